//! JSON-lines sinks standing in for the router and Cloud Controller transports

use serde::Serialize;
use tokio::sync::mpsc;
use tracing::{info, warn};

/// One output line: `{"kind": ..., "message": ...}`
pub fn json_line<T: Serialize>(kind: &str, message: &T) -> Result<String, serde_json::Error> {
    serde_json::to_string(&serde_json::json!({
        "kind": kind,
        "message": message,
    }))
}

/// Print every message received on `rx` until all senders are gone
pub async fn print_lines<T: Serialize>(kind: &'static str, mut rx: mpsc::Receiver<T>) {
    while let Some(message) = rx.recv().await {
        match json_line(kind, &message) {
            Ok(line) => println!("{line}"),
            Err(e) => warn!(kind, error = %e, "failed to encode message"),
        }
    }
    info!(kind, "output channel closed");
}

#[cfg(test)]
mod tests {
    use super::*;
    use stratus_common::model::{RouteMessage, Routes, TaskCompletion};

    #[test]
    fn route_message_line() {
        let message = RouteMessage {
            instance_id: "app-0".to_string(),
            name: "abc".to_string(),
            address: "10.0.0.1".to_string(),
            port: 8080,
            tls_port: 0,
            routes: Routes {
                registered_routes: vec!["a.example.com".to_string()],
                unregistered_routes: vec![],
            },
        };
        let line = json_line("route", &message).unwrap();
        let value: serde_json::Value = serde_json::from_str(&line).unwrap();
        assert_eq!(value["kind"], "route");
        assert_eq!(value["message"]["address"], "10.0.0.1");
        assert_eq!(value["message"]["routes"]["registered_routes"][0], "a.example.com");
        assert!(!line.contains('\n'));
    }

    #[test]
    fn task_completion_line() {
        let completion = TaskCompletion {
            guid: "task-123".to_string(),
            callback_url: "http://cc/tasks/task-123/completed".to_string(),
            failed: true,
            failure_reason: "boom".to_string(),
        };
        let value: serde_json::Value =
            serde_json::from_str(&json_line("task-completion", &completion).unwrap()).unwrap();
        assert_eq!(value["message"]["failed"], true);
        assert_eq!(value["message"]["failure_reason"], "boom");
    }
}
