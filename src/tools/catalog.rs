//! The closed catalog of executable actions.

use super::{Capability, Idempotency, ParamKind, ParamSpec, ToolKind, ToolSpec};

const BUTTONS: &[&str] = &["left", "right", "middle"];

const X: ParamSpec = ParamSpec::required(
    "x",
    ParamKind::Coordinate,
    "Horizontal position on the 0-1000 grid (0 = left edge, 1000 = right edge)",
);
const Y: ParamSpec = ParamSpec::required(
    "y",
    ParamKind::Coordinate,
    "Vertical position on the 0-1000 grid (0 = top edge, 1000 = bottom edge)",
);
const BUTTON: ParamSpec = ParamSpec::optional(
    "button",
    ParamKind::Choice(BUTTONS),
    "Mouse button (default: left)",
);
const CLEAR_EXISTING: ParamSpec = ParamSpec::optional(
    "clear_existing",
    ParamKind::Bool,
    "Select and delete the current field content before typing",
);

const SPATIAL: &[Capability] = &[Capability::SpatialInput];
const KEYBOARD: &[Capability] = &[Capability::KeyboardInput];
const SPATIAL_AND_KEYBOARD: &[Capability] =
    &[Capability::SpatialInput, Capability::KeyboardInput];

pub static CATALOG: &[ToolSpec] = &[
    ToolSpec {
        kind: ToolKind::MouseClick,
        description: "Click once at a position on the screen.",
        requires: SPATIAL,
        idempotency: Idempotency::NotIdempotent,
        params: &[X, Y, BUTTON],
    },
    ToolSpec {
        kind: ToolKind::MouseDoubleClick,
        description: "Double-click at a position on the screen (open files, select words).",
        requires: SPATIAL,
        idempotency: Idempotency::NotIdempotent,
        params: &[X, Y, BUTTON],
    },
    ToolSpec {
        kind: ToolKind::MouseHover,
        description: "Move the pointer to a position without clicking (reveal tooltips, menus).",
        requires: SPATIAL,
        idempotency: Idempotency::SafeToRetry,
        params: &[X, Y],
    },
    ToolSpec {
        kind: ToolKind::MouseDrag,
        description: "Press the left button at the start position, move to the end and release.",
        requires: SPATIAL,
        idempotency: Idempotency::NotIdempotent,
        params: &[
            ParamSpec::required("start_x", ParamKind::Coordinate, "Drag start, horizontal"),
            ParamSpec::required("start_y", ParamKind::Coordinate, "Drag start, vertical"),
            ParamSpec::required("end_x", ParamKind::Coordinate, "Drag end, horizontal"),
            ParamSpec::required("end_y", ParamKind::Coordinate, "Drag end, vertical"),
        ],
    },
    ToolSpec {
        kind: ToolKind::MouseScroll,
        description: "Scroll the mouse wheel, optionally at a position. \
                      Positive scroll_y scrolls down, negative scrolls up.",
        requires: SPATIAL,
        idempotency: Idempotency::NotIdempotent,
        params: &[
            ParamSpec::required(
                "scroll_y",
                ParamKind::Integer,
                "Vertical wheel notches (+ down, - up)",
            ),
            ParamSpec::optional(
                "scroll_x",
                ParamKind::Integer,
                "Horizontal wheel notches (+ right, - left)",
            ),
            ParamSpec::optional(
                "x",
                ParamKind::Coordinate,
                "Where to scroll, horizontal (0-1000); defaults to the surface centre",
            ),
            ParamSpec::optional(
                "y",
                ParamKind::Coordinate,
                "Where to scroll, vertical (0-1000); defaults to the surface centre",
            ),
        ],
    },
    ToolSpec {
        kind: ToolKind::KeyboardType,
        description: "Type text into the focused element. Any language is supported.",
        requires: KEYBOARD,
        idempotency: Idempotency::NotIdempotent,
        params: &[
            ParamSpec::required("text", ParamKind::Text, "Text to type"),
            CLEAR_EXISTING,
        ],
    },
    ToolSpec {
        kind: ToolKind::KeyboardPress,
        description: "Press a key or key combination, e.g. [\"enter\"] or [\"ctrl\", \"a\"]. \
                      The last key is the main key, the others are held as modifiers.",
        requires: KEYBOARD,
        idempotency: Idempotency::NotIdempotent,
        params: &[ParamSpec::required(
            "keys",
            ParamKind::KeyList,
            "Key names, modifiers first",
        )],
    },
    ToolSpec {
        kind: ToolKind::ClearText,
        description: "Clear the content of the focused text field.",
        requires: KEYBOARD,
        idempotency: Idempotency::SafeToRetry,
        params: &[],
    },
    ToolSpec {
        kind: ToolKind::ClickAndType,
        description: "Click an input field and type text into it in one step.",
        requires: SPATIAL_AND_KEYBOARD,
        idempotency: Idempotency::NotIdempotent,
        params: &[
            X,
            Y,
            ParamSpec::required("text", ParamKind::Text, "Text to type after clicking"),
            ParamSpec::optional(
                "clear_existing",
                ParamKind::Bool,
                "Clear the field before typing (default: true)",
            ),
        ],
    },
    ToolSpec {
        kind: ToolKind::Wait,
        description: "Wait for the screen to settle (page loads, animations). 1-30 seconds.",
        requires: &[],
        idempotency: Idempotency::SafeToRetry,
        params: &[ParamSpec::optional(
            "seconds",
            ParamKind::Number,
            "Seconds to wait, fractions allowed (default: 1)",
        )],
    },
    ToolSpec {
        kind: ToolKind::TaskComplete,
        description: "Declare the task finished. \
                      Call this once the goal is achieved or cannot be achieved.",
        requires: &[],
        idempotency: Idempotency::SafeToRetry,
        params: &[
            ParamSpec::optional(
                "summary",
                ParamKind::Text,
                "What was done, or why the task could not be done",
            ),
            ParamSpec::optional(
                "success",
                ParamKind::Bool,
                "Whether the goal was achieved (default: true)",
            ),
        ],
    },
];
