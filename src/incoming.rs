//! Handling of messages received on the session.

use tokio::sync::broadcast::error::RecvError;
use tokio::task::JoinHandle;
use tracing::{info, warn};

use crate::backend::IncomingMessage;
use crate::config::MessagesConfig;
use crate::dispatch::MessageDispatcher;
use crate::jid::Jid;

pub const PING_REPLY: &str = "Pong!";
const ECHO_PREFIX: &str = "You said: ";

/// The automatic answer to `message`, if any.
pub fn reply_for(message: &IncomingMessage, config: &MessagesConfig) -> Option<String> {
    if message.from_me {
        return None;
    }
    let text = message.text.as_deref()?;
    if text.trim().eq_ignore_ascii_case("ping") {
        return config.auto_reply_ping.then(|| PING_REPLY.to_string());
    }
    config
        .auto_reply_echo
        .then(|| format!("{ECHO_PREFIX}{text}"))
}

/// Log every incoming message and send auto-replies until the manager goes
/// away.
pub fn spawn(dispatcher: MessageDispatcher, config: MessagesConfig) -> JoinHandle<()> {
    let mut messages = dispatcher.manager().subscribe_messages();
    tokio::spawn(async move {
        loop {
            match messages.recv().await {
                Ok(message) => handle(&dispatcher, &message, &config).await,
                Err(RecvError::Lagged(skipped)) => {
                    warn!(skipped, "Incoming message handler fell behind");
                }
                Err(RecvError::Closed) => break,
            }
        }
    })
}

async fn handle(dispatcher: &MessageDispatcher, message: &IncomingMessage, config: &MessagesConfig) {
    if message.from_me {
        return;
    }
    let sender = message
        .from
        .parse::<Jid>()
        .map(|jid| jid.user_info().user)
        .unwrap_or_else(|_| message.from.clone());
    info!(
        from = %sender,
        id = message.id.as_deref().unwrap_or("-"),
        text = message.text.as_deref().unwrap_or("[media]"),
        "Message received"
    );

    if let Some(reply) = reply_for(message, config) {
        if let Err(e) = dispatcher.send_text(&message.from, &reply).await {
            warn!(to = %message.from, error = %e, "Auto-reply failed");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backend::{mock, SocketEvent};
    use crate::dispatch::MessageContent;

    fn text_from(from: &str, text: &str, from_me: bool) -> IncomingMessage {
        IncomingMessage {
            from: from.to_string(),
            id: Some("ID1".into()),
            text: Some(text.to_string()),
            from_me,
        }
    }

    fn replies(ping: bool, echo: bool) -> MessagesConfig {
        MessagesConfig {
            auto_reply_ping: ping,
            auto_reply_echo: echo,
        }
    }

    #[test]
    fn only_ping_gets_a_reply_by_default() {
        let from = "15551234567@s.whatsapp.net";
        let defaults = MessagesConfig::default();
        assert_eq!(
            reply_for(&text_from(from, " PING ", false), &defaults).as_deref(),
            Some("Pong!")
        );
        assert_eq!(reply_for(&text_from(from, "ping", false), &replies(false, false)), None);
        assert_eq!(reply_for(&text_from(from, "ping", true), &defaults), None);
        assert_eq!(reply_for(&text_from(from, "pinging", false), &defaults), None);

        let media = IncomingMessage {
            text: None,
            ..text_from(from, "", false)
        };
        assert_eq!(reply_for(&media, &replies(true, true)), None);
    }

    #[test]
    fn echo_answers_other_text() {
        let from = "15551234567@s.whatsapp.net";
        let echo = replies(true, true);
        assert_eq!(
            reply_for(&text_from(from, "hello there", false), &echo).as_deref(),
            Some("You said: hello there")
        );
        assert_eq!(
            reply_for(&text_from(from, "ping", false), &echo).as_deref(),
            Some("Pong!")
        );
        assert_eq!(reply_for(&text_from(from, "ping", false), &replies(false, true)), None);
        assert_eq!(reply_for(&text_from(from, "hello", true), &echo), None);
    }

    #[tokio::test]
    async fn ping_is_answered_through_the_socket() {
        let tmp = tempfile::tempdir().unwrap();
        let (manager, backend) = mock::connected_manager(tmp.path()).await;
        let task = spawn(MessageDispatcher::new(manager), MessagesConfig::default());

        backend
            .emit(SocketEvent::Message(text_from(
                "15551234567@s.whatsapp.net",
                "ping",
                false,
            )))
            .await;
        mock::wait_until(|| !backend.sent().is_empty()).await;

        assert_eq!(
            backend.sent(),
            vec![(Jid::user("15551234567"), MessageContent::text("Pong!"))]
        );
        task.abort();
    }
}
