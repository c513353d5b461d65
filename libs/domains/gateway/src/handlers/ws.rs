//! WebSocket streams: `/stream/{operation}`.

use std::future::{Future, ready};
use std::sync::Arc;

use axum::extract::ws::{Message, WebSocket, WebSocketUpgrade};
use axum::extract::{Path, State};
use axum::response::IntoResponse;
use futures::{SinkExt, StreamExt};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::json;
use tracing::{debug, info, warn};

use super::GatewayState;
use crate::error::{GatewayError, GatewayResult};
use crate::models::{
    ObjectId, RemoveRequest, SearchByIdRequest, SearchRequest, StreamResponse, VectorRequest,
};
use crate::service::GatewayService;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum StreamOperation {
    Insert,
    Update,
    Upsert,
    Remove,
    Search,
    SearchId,
    LinearSearch,
    LinearSearchId,
    /// `get_object` by id.
    Object,
}

impl StreamOperation {
    pub fn metric_name(&self) -> &'static str {
        match self {
            StreamOperation::Insert => "stream_insert",
            StreamOperation::Update => "stream_update",
            StreamOperation::Upsert => "stream_upsert",
            StreamOperation::Remove => "stream_remove",
            StreamOperation::Search => "stream_search",
            StreamOperation::SearchId => "stream_search_by_id",
            StreamOperation::LinearSearch => "stream_linear_search",
            StreamOperation::LinearSearchId => "stream_linear_search_by_id",
            StreamOperation::Object => "stream_get_object",
        }
    }
}

pub async fn stream(
    ws: WebSocketUpgrade,
    Path(operation): Path<StreamOperation>,
    State(state): State<GatewayState>,
) -> impl IntoResponse {
    ws.on_upgrade(move |socket| serve(socket, state, operation))
}

async fn serve(socket: WebSocket, state: GatewayState, operation: StreamOperation) {
    info!(operation = operation.metric_name(), "Stream opened");
    match operation {
        StreamOperation::Insert => {
            relay(socket, state, operation, |service, request: VectorRequest| async move {
                service.insert(request).await
            })
            .await
        }
        StreamOperation::Update => {
            relay(socket, state, operation, |service, request: VectorRequest| async move {
                service.update(request).await
            })
            .await
        }
        StreamOperation::Upsert => {
            relay(socket, state, operation, |service, request: VectorRequest| async move {
                service.upsert(request).await
            })
            .await
        }
        StreamOperation::Remove => {
            relay(socket, state, operation, |service, request: RemoveRequest| async move {
                service.remove(request).await
            })
            .await
        }
        StreamOperation::Search => {
            relay(socket, state, operation, |service, request: SearchRequest| async move {
                service.search(request).await
            })
            .await
        }
        StreamOperation::SearchId => {
            relay(
                socket,
                state,
                operation,
                |service, request: SearchByIdRequest| async move {
                    service.search_by_id(request).await
                },
            )
            .await
        }
        StreamOperation::LinearSearch => {
            relay(socket, state, operation, |service, request: SearchRequest| async move {
                service.linear_search(request).await
            })
            .await
        }
        StreamOperation::LinearSearchId => {
            relay(
                socket,
                state,
                operation,
                |service, request: SearchByIdRequest| async move {
                    service.linear_search_by_id(request).await
                },
            )
            .await
        }
        StreamOperation::Object => {
            relay(socket, state, operation, |service, request: ObjectId| async move {
                service.get_object(&request.id).await
            })
            .await
        }
    }
    info!(operation = operation.metric_name(), "Stream closed");
}

fn decode<Req: DeserializeOwned>(payload: &[u8]) -> GatewayResult<Req> {
    serde_json::from_slice(payload)
        .map_err(|err| GatewayError::InvalidArgument(format!("malformed stream message: {err}")))
}

fn encode<T: Serialize>(response: &StreamResponse<T>) -> String {
    serde_json::to_string(response).unwrap_or_else(|err| {
        json!({ "error": { "code": "Internal", "message": err.to_string() } }).to_string()
    })
}

/// Pump socket messages through the stream proxy and write the answers back.
///
/// A message that does not decode gets an `InvalidArgument` answer in its
/// slot. A close frame or transport error ends the input side; answers still
/// outstanding after a client close cannot be delivered, so clients close
/// once they have read every answer.
async fn relay<Req, Resp, F, Fut>(
    socket: WebSocket,
    state: GatewayState,
    operation: StreamOperation,
    call: F,
) where
    Req: DeserializeOwned + Send + 'static,
    Resp: Serialize + Send + 'static,
    F: Fn(Arc<GatewayService>, Req) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = GatewayResult<Resp>> + Send + 'static,
{
    let (mut sender, receiver) = socket.split();

    let requests = receiver
        .take_while(|frame| ready(!matches!(frame, Err(_) | Ok(Message::Close(_)))))
        .filter_map(|frame| {
            ready(match frame {
                Ok(Message::Text(text)) => Some(decode::<Req>(text.as_str().as_bytes())),
                Ok(Message::Binary(bytes)) => Some(decode::<Req>(&bytes)),
                _ => None,
            })
        });

    let service = state.service.clone();
    let call = Arc::new(call);
    let mut responses = state.streams.proxy(
        operation.metric_name(),
        requests,
        move |request: GatewayResult<Req>| {
            let (service, call) = (service.clone(), call.clone());
            async move { call(service, request?).await }
        },
    );

    let mut sent: u64 = 0;
    while let Some(response) = responses.next().await {
        if sender.send(Message::Text(encode(&response).into())).await.is_err() {
            debug!(operation = operation.metric_name(), sent, "Stream client went away");
            return;
        }
        sent += 1;
    }

    // Flushes the reply to a client close, or sends our own close frame.
    if let Err(err) = sender.close().await {
        warn!(operation = operation.metric_name(), error = %err, "Failed to close stream");
    }
    debug!(operation = operation.metric_name(), sent, "Stream drained");
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_operation_from_path_segment() {
        let op: StreamOperation = serde_json::from_str("\"search_id\"").unwrap();
        assert_eq!(op, StreamOperation::SearchId);
        let op: StreamOperation = serde_json::from_str("\"linear_search_id\"").unwrap();
        assert_eq!(op.metric_name(), "stream_linear_search_by_id");
        assert!(serde_json::from_str::<StreamOperation>("\"bogus\"").is_err());
    }

    #[test]
    fn test_decode_rejects_garbage() {
        let err = decode::<VectorRequest>(b"{not json").unwrap_err();
        assert_eq!(err.code(), tonic::Code::InvalidArgument);

        let ok: ObjectId = decode(br#"{"id":"x"}"#).unwrap();
        assert_eq!(ok.id, "x");
    }

    #[test]
    fn test_encode_response() {
        let text = encode(&StreamResponse::Response(ObjectId { id: "1".into() }));
        assert_eq!(text, r#"{"response":{"id":"1"}}"#);
    }
}
