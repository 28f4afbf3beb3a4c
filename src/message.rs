//! Wire messages exchanged between agents and user clients.
//!
//! A [`Message`] pairs a [`MessageBody`] with routing metadata: who sent it,
//! who it is addressed to, and a correlation `label` chosen by the
//! originating handle. Responses always carry the same `label` as the
//! request they answer, with `src`/`dest` swapped.

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use uuid::Uuid;

use crate::identifier::EntityId;

/// Positional arguments passed to an action invocation.
pub type ActionArgs = Vec<Value>;

/// Keyword arguments passed to an action invocation.
pub type ActionKwargs = Map<String, Value>;

/// Request half of [`MessageBody`].
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(tag = "request_kind", rename_all = "snake_case")]
pub enum RequestMessage {
    /// Invoke a named action on the destination agent's behavior.
    ActionRequest {
        /// Name of the action method to invoke.
        action_name: String,
        /// Positional arguments.
        #[serde(default)]
        pargs: ActionArgs,
        /// Keyword arguments.
        #[serde(default)]
        kargs: ActionKwargs,
    },
    /// Liveness check; the destination replies with [`ResponseMessage::PingResponse`].
    PingRequest,
    /// Ask the destination agent to begin shutting down.
    ShutdownRequest,
}

/// Response half of [`MessageBody`].
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(tag = "response_kind", rename_all = "snake_case")]
pub enum ResponseMessage {
    /// Successful result of an [`RequestMessage::ActionRequest`].
    ActionResponse {
        /// The action's return value, JSON-encoded.
        result: Value,
    },
    /// An [`RequestMessage::ActionRequest`] failed; carries the error message.
    ActionError {
        /// Human-readable description of the failure.
        exception: String,
    },
    /// Reply to [`RequestMessage::PingRequest`].
    PingResponse,
    /// Reply to [`RequestMessage::ShutdownRequest`].
    ShutdownResponse,
}

/// Either half of a [`Message`]: a request awaiting a reply, or a reply to
/// a previously sent request.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum MessageBody {
    /// A request that expects a corresponding response.
    Request(RequestMessage),
    /// A response to a previously received request.
    Response(ResponseMessage),
}

impl MessageBody {
    /// `true` if this is a request body.
    #[must_use]
    pub fn is_request(&self) -> bool {
        matches!(self, Self::Request(_))
    }

    /// `true` if this is a response body.
    #[must_use]
    pub fn is_response(&self) -> bool {
        matches!(self, Self::Response(_))
    }
}

/// A single message routed through the exchange.
///
/// `label` is an opaque correlation id chosen by the handle that originates
/// a request; every response to that request carries the same label, so a
/// handle with several outstanding actions can match replies back to their
/// waiters regardless of arrival order.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Message {
    id: Uuid,
    src: EntityId,
    dest: EntityId,
    label: Uuid,
    body: MessageBody,
}

impl Message {
    /// Builds a new request message with a fresh `label`.
    #[must_use]
    pub fn request(src: EntityId, dest: EntityId, body: RequestMessage) -> Self {
        Self::request_with_label(src, dest, Uuid::new_v4(), body)
    }

    /// Builds a new request message with a caller-chosen `label`.
    #[must_use]
    pub fn request_with_label(
        src: EntityId,
        dest: EntityId,
        label: Uuid,
        body: RequestMessage,
    ) -> Self {
        Self {
            id: Uuid::new_v4(),
            src,
            dest,
            label,
            body: MessageBody::Request(body),
        }
    }

    /// Builds the response to this message, preserving `label` and swapping
    /// `src`/`dest`.
    ///
    /// # Panics
    ///
    /// Panics if called on a message that is itself a response; only
    /// requests have responses.
    #[must_use]
    pub fn respond(&self, body: ResponseMessage) -> Self {
        assert!(
            self.body.is_request(),
            "cannot build a response to a response message"
        );
        Self {
            id: Uuid::new_v4(),
            src: self.dest.clone(),
            dest: self.src.clone(),
            label: self.label,
            body: MessageBody::Response(body),
        }
    }

    /// Builds an [`ResponseMessage::ActionError`] response carrying `exception`,
    /// preserving `label` and swapping `src`/`dest`.
    #[must_use]
    pub fn error_response(&self, exception: impl Into<String>) -> Self {
        self.respond(ResponseMessage::ActionError {
            exception: exception.into(),
        })
    }

    /// The message's own unique id.
    #[must_use]
    pub fn id(&self) -> Uuid {
        self.id
    }

    /// The sender.
    #[must_use]
    pub fn src(&self) -> &EntityId {
        &self.src
    }

    /// The destination mailbox this message is addressed to.
    #[must_use]
    pub fn dest(&self) -> &EntityId {
        &self.dest
    }

    /// The correlation id shared by a request and its response.
    #[must_use]
    pub fn label(&self) -> Uuid {
        self.label
    }

    /// The message body.
    #[must_use]
    pub fn body(&self) -> &MessageBody {
        &self.body
    }

    /// Consumes the message, returning its body.
    #[must_use]
    pub fn into_body(self) -> MessageBody {
        self.body
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::identifier::{AgentId, UserId};

    fn agent() -> EntityId {
        AgentId::<()>::new().into()
    }

    fn user() -> EntityId {
        UserId::new().into()
    }

    #[test]
    fn response_preserves_label_and_swaps_endpoints() {
        let src = user();
        let dest = agent();
        let request = Message::request(src.clone(), dest.clone(), RequestMessage::PingRequest);

        let response = request.respond(ResponseMessage::PingResponse);

        assert_eq!(response.label(), request.label());
        assert_eq!(response.src(), &dest);
        assert_eq!(response.dest(), &src);
        assert!(response.body().is_response());
    }

    #[test]
    fn error_response_carries_message() {
        let request = Message::request(
            user(),
            agent(),
            RequestMessage::ActionRequest {
                action_name: "add".into(),
                pargs: vec![Value::from(1), Value::from(2)],
                kargs: Map::new(),
            },
        );

        let error = request.error_response("no such action");

        match error.into_body() {
            MessageBody::Response(ResponseMessage::ActionError { exception }) => {
                assert_eq!(exception, "no such action");
            }
            other => panic!("unexpected body: {other:?}"),
        }
    }

    #[test]
    fn json_round_trips() {
        let request = Message::request(
            user(),
            agent(),
            RequestMessage::ActionRequest {
                action_name: "echo".into(),
                pargs: vec![Value::from("hi")],
                kargs: Map::new(),
            },
        );

        let json = serde_json::to_string(&request).unwrap();
        let parsed: Message = serde_json::from_str(&json).unwrap();
        assert_eq!(parsed, request);
    }

    #[test]
    #[should_panic(expected = "cannot build a response to a response message")]
    fn responding_to_a_response_panics() {
        let request = Message::request(user(), agent(), RequestMessage::PingRequest);
        let response = request.respond(ResponseMessage::PingResponse);
        let _ = response.respond(ResponseMessage::PingResponse);
    }

    mod properties {
        use super::*;
        use proptest::prelude::*;

        prop_compose! {
            fn arb_scalar_value()(choice in 0u8..4) -> Value {
                match choice {
                    0 => Value::Null,
                    1 => Value::Bool(true),
                    2 => Value::from(42_i64),
                    _ => Value::from("value"),
                }
            }
        }

        prop_compose! {
            fn arb_action_request()(
                action_name in "[a-z][a-z0-9_]{0,16}",
                pargs in prop::collection::vec(arb_scalar_value(), 0..4),
            ) -> RequestMessage {
                RequestMessage::ActionRequest {
                    action_name,
                    pargs,
                    kargs: Map::new(),
                }
            }
        }

        prop_compose! {
            fn arb_request_message()(
                is_action in any::<bool>(),
                action in arb_action_request(),
            ) -> RequestMessage {
                if is_action {
                    action
                } else {
                    RequestMessage::PingRequest
                }
            }
        }

        proptest! {
            #[test]
            fn json_round_trip_preserves_every_field(body in arb_request_message()) {
                let message = Message::request(user(), agent(), body);
                let json = serde_json::to_string(&message).unwrap();
                let parsed: Message = serde_json::from_str(&json).unwrap();
                prop_assert_eq!(parsed, message);
            }

            #[test]
            fn respond_always_preserves_label_and_swaps_endpoints(body in arb_request_message()) {
                let src = user();
                let dest = agent();
                let request = Message::request(src.clone(), dest.clone(), body);

                let response = request.respond(ResponseMessage::PingResponse);

                prop_assert_eq!(response.label(), request.label());
                prop_assert_eq!(response.src(), &dest);
                prop_assert_eq!(response.dest(), &src);
            }
        }
    }
}
