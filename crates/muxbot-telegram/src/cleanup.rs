//! Topic state cleanup, shared by the poller, the dispatcher, and the
//! topic-closed handler so no path leaks registry entries.

use std::sync::Arc;

use teloxide::prelude::*;
use tracing::debug;

use crate::interactive::clear_interactive_msg;
use crate::state::Shared;

/// Clear every in-memory trace of a topic: status tracking, tool-message
/// ids, interactive state, and any pending directory-selection flow.
///
/// Called when a topic is closed or deleted, or when its binding goes
/// stale because the window vanished externally.
pub async fn clear_topic_state(bot: &Bot, shared: &Arc<Shared>, chat_id: i64, thread_id: i32) {
    debug!(chat = chat_id, thread = thread_id, "clearing topic state");
    let key = (chat_id, thread_id);

    shared.status_msgs.remove(&key);
    shared
        .tool_msgs
        .retain(|(_, chat, thread), _| !(*chat == chat_id && *thread == thread_id));

    clear_interactive_msg(bot, shared, chat_id, Some(thread_id)).await;

    if let Some(mut browse) = shared.browse.get_mut(&chat_id) {
        if browse.pending_thread == Some(thread_id) {
            browse.pending_thread = None;
            browse.pending_text = None;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::state::StatusMsgInfo;
    use teloxide::types::MessageId;

    fn shared(dir: &tempfile::TempDir) -> Arc<Shared> {
        let config: muxbot_core::MuxbotConfig = serde_json::from_value(serde_json::json!({
            "telegram": { "bot_token": "t", "allowed_users": [1] },
            "state_dir": dir.path(),
        }))
        .unwrap();
        let store = Arc::new(muxbot_sessions::SessionStore::new(
            &dir.path().join("state.json"),
            &dir.path().join("session_map.json"),
            "muxbot",
            &dir.path().join("projects"),
        ));
        let mux = muxbot_mux::make_backend(&config.multiplexer, "claude");
        Shared::new(config, store, mux)
    }

    #[tokio::test]
    async fn clears_only_the_given_topic() {
        let dir = tempfile::tempdir().unwrap();
        let shared = shared(&dir);
        let bot = Bot::new("000:fake");

        shared.status_msgs.insert(
            (100, 42),
            StatusMsgInfo {
                message_id: MessageId(1),
                window_name: "w".into(),
                last_text: "t".into(),
            },
        );
        shared.tool_msgs.insert(("t1".into(), 100, 42), MessageId(2));
        shared.tool_msgs.insert(("t2".into(), 100, 7), MessageId(3));

        clear_topic_state(&bot, &shared, 100, 42).await;

        assert!(shared.status_msgs.get(&(100, 42)).is_none());
        assert!(shared.tool_msgs.get(&("t1".to_string(), 100, 42)).is_none());
        // Another topic's entry survives.
        assert!(shared.tool_msgs.get(&("t2".to_string(), 100, 7)).is_some());
    }
}
