// src/http/result.rs

use serde_json::Value;
use tracing::trace;

use crate::message::{EmitEvent, Emitter, Message};
use crate::node_type::{NodeError, NodeOutput};

/// 把解码结果交给平台。
///
/// split 模式下数组逐个发出 `data`，每次等上一次 emit 完成，最后发 `end`；
/// 否则返回一条带 `outward` 附件的消息。
pub async fn emit_result(
    decoded: Value,
    outward: Message,
    split_result: bool,
    emitter: &dyn Emitter,
) -> Result<NodeOutput, NodeError> {
    match decoded {
        Value::Array(items) if split_result => {
            let total = items.len();
            for (index, item) in items.into_iter().enumerate() {
                trace!(index, total, "emitting split item");
                emitter.emit(EmitEvent::Data(Message::with_body(item))).await?;
            }
            emitter.emit(EmitEvent::End).await?;
            Ok(NodeOutput::Emitted)
        }
        body => Ok(NodeOutput::Message(Message { body, ..outward })),
    }
}

/// 发出 `rebound` 和 `end`，平台稍后会重投这条消息。
pub async fn emit_rebound(error: &NodeError, emitter: &dyn Emitter) -> Result<NodeOutput, NodeError> {
    emitter.emit(EmitEvent::Rebound(error.to_string())).await?;
    emitter.emit(EmitEvent::End).await?;
    Ok(NodeOutput::Emitted)
}
