mod calc;
mod db;
mod ipc;
mod report;

use std::io::{self, BufRead, Write};
use std::path::PathBuf;

fn main() {
    // All logging goes to stderr; stdout carries only protocol lines.
    env_logger::init();

    let mut state = ipc::AppState {
        workspace: None,
        db: None,
    };

    // Scripted runs can skip the workspace.select round trip.
    if let Ok(path) = std::env::var("GRADEBOOKD_WORKSPACE") {
        if !path.trim().is_empty() {
            let path = PathBuf::from(path);
            match db::open_db(&path) {
                Ok(conn) => {
                    log::info!(
                        "workspace preselected from GRADEBOOKD_WORKSPACE: {}",
                        path.to_string_lossy()
                    );
                    state.workspace = Some(path);
                    state.db = Some(conn);
                }
                Err(e) => {
                    log::error!(
                        "failed to open GRADEBOOKD_WORKSPACE {}: {:?}",
                        path.to_string_lossy(),
                        e
                    );
                }
            }
        }
    }

    log::info!("gradebookd {} listening on stdio", env!("CARGO_PKG_VERSION"));

    let stdin = io::stdin();
    let mut stdout = io::stdout();

    for line in stdin.lock().lines() {
        let line = match line {
            Ok(v) => v,
            Err(_) => break,
        };
        if line.trim().is_empty() {
            continue;
        }

        let req: ipc::Request = match serde_json::from_str(&line) {
            Ok(v) => v,
            Err(e) => {
                // Can't reply with an id we failed to parse.
                log::warn!("dropped malformed request line: {}", e);
                let _ = writeln!(
                    stdout,
                    "{{\"ok\":false,\"error\":{{\"code\":\"bad_json\",\"message\":\"{}\"}}}}",
                    e
                );
                let _ = stdout.flush();
                continue;
            }
        };

        log::debug!("handling {} (id {})", req.method, req.id);
        let resp = ipc::handle_request(&mut state, req);
        let _ = writeln!(
            stdout,
            "{}",
            serde_json::to_string(&resp).unwrap_or_else(|_| "{\"ok\":false}".to_string())
        );
        let _ = stdout.flush();
    }
}
