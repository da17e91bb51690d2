use atlas_core::{Group, GroupType, Service};
use atlas_queue::{Handle, QueueError};
use log::error;
use rustyline::error::ReadlineError;
use rustyline::DefaultEditor;
use tokio::runtime::Handle as RtHandle;

use crate::command::MasterCommand;

/// Blocking REPL loop, run on its own OS thread (see `tokio::task::spawn_blocking`
/// in `main.rs`) so `rustyline`'s synchronous `readline` never occupies a
/// tokio worker. Every line is parsed into a [`MasterCommand`] and dispatched
/// through the same queue the slave listener and ticker use; replies are
/// awaited by blocking the current thread on the runtime handle, not by
/// spawning a nested executor.
pub fn run(handle: Handle<MasterCommand>) {
    let rt = RtHandle::current();
    let mut editor = match DefaultEditor::new() {
        Ok(editor) => editor,
        Err(err) => {
            error!("failed to start the interactive shell: {err}");
            return;
        }
    };

    // At most one attached service per session, mirroring the source's
    // single-field screen tracker rather than a stack of targets.
    let mut attached: Option<String> = None;

    loop {
        let prompt = match &attached {
            Some(name) => format!("atlas ({name})> "),
            None => "atlas> ".to_string(),
        };
        let line = match editor.readline(&prompt) {
            Ok(line) => line,
            Err(ReadlineError::Interrupted) | Err(ReadlineError::Eof) => break,
            Err(err) => {
                error!("readline error: {err}");
                break;
            }
        };
        let line = line.trim();
        if line.is_empty() {
            continue;
        }
        let _ = editor.add_history_entry(line);

        if attached.is_some() {
            if line == "exit" || line == "detach" {
                let result = rt.block_on(handle.call(|reply| MasterCommand::ScreenDetach { reply }));
                report(result);
                attached = None;
            } else {
                let result = rt.block_on(
                    handle.call(|reply| MasterCommand::ScreenExecute { command: line.to_string(), reply }),
                );
                report(result);
            }
            continue;
        }

        let words: Vec<&str> = line.split_whitespace().collect();
        match words.as_slice() {
            ["shutdown"] => {
                let _ = rt.block_on(handle.send(MasterCommand::Shutdown));
                break;
            }
            ["group", "create", name, kind, min, max, memory, port] => {
                match parse_group(name, kind, min, max, memory, port) {
                    Ok(group) => {
                        let result = rt.block_on(handle.call(|reply| MasterCommand::GroupCreate { group, reply }));
                        report(result);
                    }
                    Err(err) => println!("error: {err}"),
                }
            }
            ["group", "list"] => match rt.block_on(handle.call(|reply| MasterCommand::GroupList { reply })) {
                Ok(groups) => print_groups(&groups),
                Err(err) => println!("error: {err}"),
            },
            ["group", "reload"] => {
                let result = rt.block_on(handle.call(|reply| MasterCommand::GroupReload { reply }));
                report(result);
            }
            ["group", "restart", name] => {
                let result = rt.block_on(
                    handle.call(|reply| MasterCommand::GroupRestart { name: name.to_string(), reply }),
                );
                report(result);
            }
            ["service", "list"] => match rt.block_on(handle.call(|reply| MasterCommand::ServiceList { reply })) {
                Ok(services) => print_services(&services),
                Err(err) => println!("error: {err}"),
            },
            ["service", "stop", name] => {
                let result = rt.block_on(
                    handle.call(|reply| MasterCommand::ServiceStop { name: name.to_string(), reply }),
                );
                report(result);
            }
            ["service", "screen", name] => {
                let result = rt.block_on(
                    handle.call(|reply| MasterCommand::ScreenAttach { name: name.to_string(), reply }),
                );
                match result {
                    Ok(Ok(())) => attached = Some(name.to_string()),
                    Ok(Err(err)) => println!("error: {err}"),
                    Err(err) => println!("error: {err}"),
                }
            }
            _ => println!("unrecognized command: {line}"),
        }
    }
}

fn report(result: Result<Result<(), String>, QueueError>) {
    match result {
        Ok(Ok(())) => {}
        Ok(Err(err)) => println!("error: {err}"),
        Err(err) => println!("error: {err}"),
    }
}

fn parse_group(name: &str, kind: &str, min: &str, max: &str, memory: &str, port: &str) -> Result<Group, String> {
    let kind = match kind {
        "proxy" => GroupType::Proxy,
        "server" => GroupType::Server,
        other => return Err(format!("unknown group type '{other}', expected 'proxy' or 'server'")),
    };
    Ok(Group {
        name: name.to_string(),
        kind,
        min_services: min.parse().map_err(|_| format!("invalid min_services '{min}'"))?,
        max_services: max.parse().map_err(|_| format!("invalid max_services '{max}'"))?,
        memory_mib: memory.parse().map_err(|_| format!("invalid memory_mib '{memory}'"))?,
        start_port: port.parse().map_err(|_| format!("invalid start_port '{port}'"))?,
    })
}

fn print_groups(groups: &[Group]) {
    for g in groups {
        println!(
            "{:<16} {:<7} min={:<3} max={:<3} memory={:<6} start_port={}",
            g.name,
            format!("{:?}", g.kind).to_lowercase(),
            g.min_services,
            g.max_services,
            g.memory_mib,
            g.start_port
        );
    }
}

fn print_services(services: &[Service]) {
    for s in services {
        println!(
            "{:<16} group={:<16} state={:<10} slave={:<12} port={}",
            s.name,
            s.group_name,
            s.state.to_string(),
            s.slave_name.as_deref().unwrap_or("-"),
            s.listen_port
        );
    }
}
