use bitflags::bitflags;
use cadflow_core::geometry::Point2;

bitflags! {
    /// 操作等待输入时关心的事件类别。
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
    pub struct InputMask: u8 {
        const KEYBOARD = 0x1;
        const MOUSE_MOVE = 0x2;
        const MOUSE_CLICK = 0x4;
        const MOUSE = Self::MOUSE_MOVE.bits() | Self::MOUSE_CLICK.bits();
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum KeyCode {
    Escape,
    Enter,
    Char(char),
}

impl KeyCode {
    /// 解析脚本或命令行中的按键名，单个字符按大写保存。
    pub fn from_name(name: &str) -> Option<Self> {
        match name.to_ascii_lowercase().as_str() {
            "escape" | "esc" => Some(KeyCode::Escape),
            "enter" | "return" => Some(KeyCode::Enter),
            _ => {
                let mut chars = name.chars();
                match (chars.next(), chars.next()) {
                    (Some(ch), None) => Some(KeyCode::Char(ch.to_ascii_uppercase())),
                    _ => None,
                }
            }
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum MouseButton {
    Left,
    Right,
    Middle,
}

impl MouseButton {
    pub fn from_name(name: &str) -> Option<Self> {
        match name.to_ascii_lowercase().as_str() {
            "left" => Some(MouseButton::Left),
            "right" => Some(MouseButton::Right),
            "middle" => Some(MouseButton::Middle),
            _ => None,
        }
    }
}

/// 界面转发给操作的输入事件。一次点击就是一个事件，不区分按下与抬起。
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum InputEvent {
    Key(KeyCode),
    MouseMove { position: Point2 },
    MouseClick { position: Point2, button: MouseButton },
}

impl InputEvent {
    pub fn click(x: f64, y: f64) -> Self {
        InputEvent::MouseClick {
            position: Point2::new(x, y),
            button: MouseButton::Left,
        }
    }

    pub fn mouse_move(x: f64, y: f64) -> Self {
        InputEvent::MouseMove {
            position: Point2::new(x, y),
        }
    }

    pub fn category(&self) -> InputMask {
        match self {
            InputEvent::Key(_) => InputMask::KEYBOARD,
            InputEvent::MouseMove { .. } => InputMask::MOUSE_MOVE,
            InputEvent::MouseClick { .. } => InputMask::MOUSE_CLICK,
        }
    }

    pub fn position(&self) -> Option<Point2> {
        match self {
            InputEvent::Key(_) => None,
            InputEvent::MouseMove { position } | InputEvent::MouseClick { position, .. } => {
                Some(*position)
            }
        }
    }

    #[inline]
    pub fn is_escape(&self) -> bool {
        matches!(self, InputEvent::Key(KeyCode::Escape))
    }

    pub fn is_click(&self, expected: MouseButton) -> bool {
        matches!(self, InputEvent::MouseClick { button, .. } if *button == expected)
    }
}
