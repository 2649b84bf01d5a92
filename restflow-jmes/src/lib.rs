//! restflow-jmes
//!
//! 连接器使用的表达式求值器。URL、header、body 模板都是 JMESPath 表达式，
//! 以消息 body 作为上下文求值。求值是纯函数：同一表达式、同一上下文得到同一结果。

mod runtime;

pub use runtime::CUSTOM_RUNTIME;

use serde_json::Value;

/// 表达式编译或执行失败。
#[derive(Debug, thiserror::Error)]
pub enum EvaluationError {
    #[error("Cannot compile expression `{expression}`: {reason}")]
    Compile { expression: String, reason: String },

    #[error("Cannot evaluate expression `{expression}`: {reason}")]
    Execution { expression: String, reason: String },

    #[error("Cannot convert result of `{expression}`: {reason}")]
    Serialization { expression: String, reason: String },
}

/// 对外暴露的求值接口：`evaluate(expression, context) -> value`。
///
/// 节点只依赖这个 trait，测试或其他表达式语言可以替换实现。
pub trait ExpressionEvaluator: Send + Sync {
    fn evaluate(&self, expression: &str, context: &Value) -> Result<Value, EvaluationError>;
}

/// 基于 [`CUSTOM_RUNTIME`] 的 JMESPath 实现。
#[derive(Debug, Default, Clone, Copy)]
pub struct JmesEvaluator;

impl JmesEvaluator {
    pub fn new() -> Self {
        Self
    }
}

impl ExpressionEvaluator for JmesEvaluator {
    fn evaluate(&self, expression: &str, context: &Value) -> Result<Value, EvaluationError> {
        let expr = CUSTOM_RUNTIME
            .compile(expression)
            .map_err(|e| EvaluationError::Compile {
                expression: expression.to_owned(),
                reason: e.to_string(),
            })?;
        let result = expr.search(context).map_err(|e| EvaluationError::Execution {
            expression: expression.to_owned(),
            reason: e.to_string(),
        })?;
        serde_json::to_value(&*result).map_err(|e| EvaluationError::Serialization {
            expression: expression.to_owned(),
            reason: e.to_string(),
        })
    }
}
