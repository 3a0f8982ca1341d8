//! 输入脚本：每行一条命令，`#` 开头为注释。
//!
//! ```text
//! op Create Line
//! click 0 0
//! move 4 4
//! click 10 10 left
//! wait
//! undo
//! ```

use std::path::PathBuf;

use cadflow_core::geometry::Point2;
use cadflow_engine::input::{InputEvent, KeyCode, MouseButton};

use crate::errors::FrontendError;

#[derive(Debug, Clone, PartialEq)]
pub enum ScriptCommand {
    /// 启动已注册的操作。
    Begin(String),
    /// 转发给活动文档上的操作。
    Input(InputEvent),
    /// 等待所有已启动的操作结束。
    Wait,
    Undo,
    Redo,
    Save(PathBuf),
}

pub fn parse_script(source: &str) -> Result<Vec<ScriptCommand>, FrontendError> {
    let mut commands = Vec::new();
    for (index, raw) in source.lines().enumerate() {
        let line = raw.trim();
        if line.is_empty() || line.starts_with('#') {
            continue;
        }
        commands.push(parse_line(index + 1, line)?);
    }
    Ok(commands)
}

fn parse_line(line_no: usize, line: &str) -> Result<ScriptCommand, FrontendError> {
    let error = |message: String| FrontendError::Script {
        line: line_no,
        message,
    };
    let (verb, rest) = match line.split_once(char::is_whitespace) {
        Some((verb, rest)) => (verb, rest.trim()),
        None => (line, ""),
    };
    let args: Vec<&str> = rest.split_whitespace().collect();

    match verb.to_ascii_lowercase().as_str() {
        "op" => {
            if rest.is_empty() {
                return Err(error("`op` 需要操作名".to_string()));
            }
            Ok(ScriptCommand::Begin(rest.to_string()))
        }
        "click" => {
            let (x, y) = coordinates(&args, "click").map_err(error)?;
            let button = match args.get(2) {
                None => MouseButton::Left,
                Some(name) => MouseButton::from_name(name)
                    .ok_or_else(|| error(format!("未知的鼠标按键 `{name}`")))?,
            };
            if args.len() > 3 {
                return Err(error("`click` 参数过多".to_string()));
            }
            Ok(ScriptCommand::Input(InputEvent::MouseClick {
                position: Point2::new(x, y),
                button,
            }))
        }
        "move" => {
            let (x, y) = coordinates(&args, "move").map_err(error)?;
            if args.len() > 2 {
                return Err(error("`move` 参数过多".to_string()));
            }
            Ok(ScriptCommand::Input(InputEvent::mouse_move(x, y)))
        }
        "key" => match args.as_slice() {
            [name] => KeyCode::from_name(name)
                .map(|key| ScriptCommand::Input(InputEvent::Key(key)))
                .ok_or_else(|| error(format!("未知的按键 `{name}`"))),
            _ => Err(error("`key` 需要一个按键名".to_string())),
        },
        "wait" => no_args(&args, ScriptCommand::Wait).map_err(error),
        "undo" => no_args(&args, ScriptCommand::Undo).map_err(error),
        "redo" => no_args(&args, ScriptCommand::Redo).map_err(error),
        "save" => {
            if rest.is_empty() {
                return Err(error("`save` 需要文件路径".to_string()));
            }
            Ok(ScriptCommand::Save(PathBuf::from(rest)))
        }
        other => Err(error(format!("未知命令 `{other}`"))),
    }
}

fn coordinates(args: &[&str], verb: &str) -> Result<(f64, f64), String> {
    let (Some(x), Some(y)) = (args.first(), args.get(1)) else {
        return Err(format!("`{verb}` 需要 x 与 y 坐标"));
    };
    let parse = |raw: &str| {
        raw.parse::<f64>()
            .map_err(|_| format!("坐标 `{raw}` 不是数字"))
    };
    Ok((parse(x)?, parse(y)?))
}

fn no_args(args: &[&str], command: ScriptCommand) -> Result<ScriptCommand, String> {
    if args.is_empty() {
        Ok(command)
    } else {
        Err("该命令不接受参数".to_string())
    }
}
