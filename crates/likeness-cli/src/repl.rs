//! Line protocol for `likeness session`.
//!
//! Each stdin line is one command; the session plays the role of a live
//! viewer where frames arrive and the user decides when to enroll.

use std::path::PathBuf;

pub const HELP: &str = "\
commands:
  frame <image> [boxes.json]   recognize faces in an image
  pending [save <png>]         show or save the face waiting to be enrolled
  enroll <name>                save the pending face under <name>
  list                         list enrolled names
  delete <name>                remove every record for <name>
  clear                        remove all records
  reload                       re-read the gallery from the database
  format                       remove all records and dataset files
  status                       print engine status
  quit                         leave the session";

#[derive(Debug, Clone, PartialEq)]
pub enum Command {
    Frame { image: PathBuf, boxes: Option<PathBuf> },
    Pending { save: Option<PathBuf> },
    Enroll { name: String },
    List,
    Delete { name: String },
    Clear,
    Reload,
    Format,
    Status,
    Help,
    Quit,
}

/// Parse one input line. Blank lines yield `Ok(None)`.
pub fn parse_command(line: &str) -> Result<Option<Command>, String> {
    let line = line.trim();
    if line.is_empty() {
        return Ok(None);
    }

    let (verb, rest) = match line.split_once(char::is_whitespace) {
        Some((verb, rest)) => (verb, rest.trim()),
        None => (line, ""),
    };

    let command = match verb {
        "frame" => {
            let mut args = rest.split_whitespace();
            let image = args.next().ok_or("usage: frame <image> [boxes.json]")?;
            let boxes = args.next().map(PathBuf::from);
            if args.next().is_some() {
                return Err("usage: frame <image> [boxes.json]".into());
            }
            Command::Frame { image: image.into(), boxes }
        }
        "pending" => match rest.split_once(char::is_whitespace) {
            None if rest.is_empty() => Command::Pending { save: None },
            Some(("save", path)) => Command::Pending { save: Some(path.trim().into()) },
            _ => return Err("usage: pending [save <png>]".into()),
        },
        // Names run to the end of the line and may contain spaces.
        "enroll" if !rest.is_empty() => Command::Enroll { name: rest.to_string() },
        "enroll" => return Err("enter a name".into()),
        "delete" if !rest.is_empty() => Command::Delete { name: rest.to_string() },
        "delete" => return Err("usage: delete <name>".into()),
        "list" => Command::List,
        "clear" => Command::Clear,
        "reload" => Command::Reload,
        "format" => Command::Format,
        "status" => Command::Status,
        "help" | "?" => Command::Help,
        "quit" | "exit" => Command::Quit,
        other => return Err(format!("unknown command '{other}' (try 'help')")),
    };
    Ok(Some(command))
}
