// src/runtime.rs
use jmespath::functions::{ArgumentType, CustomFunction, Signature};
use jmespath::{Context, JmespathError, Rcvar, Runtime, Variable};
use lazy_static::lazy_static;
use tracing::debug;

lazy_static! {
    /// 全局 JMESPath 运行时：内置函数 + 连接器常用的字符串函数。
    pub static ref CUSTOM_RUNTIME: Runtime = build_runtime();
}

fn build_runtime() -> Runtime {
    let mut rt = Runtime::new();
    rt.register_builtin_functions();

    // uppercase(s)
    rt.register_function(
        "uppercase",
        Box::new(CustomFunction::new(
            Signature::new(vec![ArgumentType::String], None),
            Box::new(|args: &[Rcvar], _: &mut Context<'_>| {
                let s = args[0].as_string().cloned().unwrap_or_default();
                Ok::<_, JmespathError>(Rcvar::new(Variable::String(s.to_uppercase())))
            }),
        )),
    );

    // lowercase(s)
    rt.register_function(
        "lowercase",
        Box::new(CustomFunction::new(
            Signature::new(vec![ArgumentType::String], None),
            Box::new(|args: &[Rcvar], _: &mut Context<'_>| {
                let s = args[0].as_string().cloned().unwrap_or_default();
                Ok::<_, JmespathError>(Rcvar::new(Variable::String(s.to_lowercase())))
            }),
        )),
    );

    // split(delim, input)
    rt.register_function(
        "split",
        Box::new(CustomFunction::new(
            Signature::new(vec![ArgumentType::String, ArgumentType::String], None),
            Box::new(|args: &[Rcvar], _: &mut Context<'_>| {
                let delim = args[0].as_string().cloned().unwrap_or_default();
                let input = args[1].as_string().cloned().unwrap_or_default();
                let parts: Vec<Rcvar> = input
                    .split(delim.as_str())
                    .map(|part| Rcvar::new(Variable::String(part.to_string())))
                    .collect();
                Ok::<_, JmespathError>(Rcvar::new(Variable::Array(parts)))
            }),
        )),
    );

    debug!("JMES runtime initialized with builtins + custom functions.");
    rt
}
