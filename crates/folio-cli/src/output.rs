use color_eyre::Result;
use serde_json::{json, Value};

use crate::dispatch::{CommandInfo, CommandStatus, ExecutionOutcome};

#[derive(Clone, Copy, Debug)]
pub struct OutputOptions {
    pub json: bool,
}

pub fn emit_output(
    opts: OutputOptions,
    info: CommandInfo,
    outcome: &ExecutionOutcome,
) -> Result<i32> {
    let code = match outcome.status {
        CommandStatus::Ok => 0,
        CommandStatus::UserError => 1,
        CommandStatus::Failure => 2,
    };

    if opts.json {
        let payload = to_json_response(info, outcome);
        println!("{}", serde_json::to_string_pretty(&payload)?);
        return Ok(code);
    }

    for line in &outcome.lines {
        println!("{line}");
    }
    let message = format_status_message(info, &outcome.message);
    match outcome.status {
        CommandStatus::Ok if outcome.lines.is_empty() => println!("{message}"),
        CommandStatus::Ok => {}
        CommandStatus::UserError | CommandStatus::Failure => eprintln!("{message}"),
    }
    Ok(code)
}

pub fn to_json_response(info: CommandInfo, outcome: &ExecutionOutcome) -> Value {
    let status = match outcome.status {
        CommandStatus::Ok => "ok",
        CommandStatus::UserError => "user-error",
        CommandStatus::Failure => "error",
    };
    let details = match &outcome.details {
        Value::Object(_) => outcome.details.clone(),
        Value::Null => json!({}),
        other => json!({ "value": other }),
    };
    json!({
        "status": status,
        "message": format_status_message(info, &outcome.message),
        "details": details,
    })
}

#[must_use]
pub fn format_status_message(info: CommandInfo, message: &str) -> String {
    let prefix = format!("folio {} {}", info.group, info.name);
    if message.is_empty() {
        prefix
    } else {
        format!("{prefix}: {message}")
    }
}
