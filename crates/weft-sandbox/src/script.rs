//! Snippet composition and evaluation with `boa_engine`.
//!
//! Both isolation strategies end up here: the inline one on a dedicated
//! thread, the process one inside the worker.

use std::future::Future;

use boa_engine::{Context, Script, Source};
use futures::future::{self, Either};
use serde_json::Value;
use tracing::debug;

use crate::protocol::{ResultMessage, StartMessage};

/// Build the script evaluated for one start message.
///
/// The snippet is compiled with `new Function` so its text cannot escape the
/// function body. The script's completion value is a JSON string shaped like
/// a [`ResultMessage`].
pub fn compose(msg: &StartMessage) -> serde_json::Result<String> {
    let input_json = serde_json::to_string(&msg.input)?;
    let input_literal = serde_json::to_string(&input_json)?;
    let code_literal = serde_json::to_string(&msg.code)?;

    let mut params = vec![
        serde_json::to_string("input")?,
        serde_json::to_string("pkg")?,
    ];
    let mut args = vec!["__input", "__pkg"];
    for name in &msg.binding_names {
        if name == "input" || name == "pkg" {
            continue;
        }
        params.push(serde_json::to_string(name)?);
        args.push("__pkg");
    }

    Ok(format!(
        r#"(function () {{
  function __describe(e) {{
    if (e && typeof e === "object" && e.message !== undefined) {{
      return String(e.message);
    }}
    return String(e);
  }}
  try {{
    var __pkg = (function () {{
      var module = {{ exports: {{}} }};
      var exports = module.exports;
{binding_source}
      return module.exports;
    }})();
    var __input = JSON.parse({input_literal});
    var __fn = new Function({params}, {code_literal});
    var __out = __fn({args});
    return JSON.stringify({{ success: true, output: __out === undefined ? null : __out }});
  }} catch (e) {{
    return JSON.stringify({{ success: false, error: __describe(e) }});
  }}
}})();
"#,
        binding_source = msg.binding_source,
        input_literal = input_literal,
        params = params.join(", "),
        code_literal = code_literal,
        args = args.join(", "),
    ))
}

/// Instruction cost the engine runs between checks for an interrupt.
const EVAL_BUDGET: u32 = 4096;

/// Error text of an evaluation stopped by its interrupt.
pub const INTERRUPTED_MESSAGE: &str = "Evaluation interrupted";

/// Evaluate a start message in a fresh context and produce the result message.
///
/// Never panics on script failure: syntax errors, thrown values and runtime
/// limit violations all become `success: false`.
pub fn evaluate(msg: &StartMessage) -> ResultMessage {
    evaluate_until(msg, future::pending::<()>())
}

/// Like [`evaluate`], but abandons the script once `interrupt` completes.
///
/// Blocks the calling thread. The engine yields every few thousand
/// instructions of JS code, and `interrupt` is polled at each yield. Code
/// running inside a native callback (e.g. the function passed to
/// `Array.prototype.map`) only yields once control returns to JS bytecode.
pub fn evaluate_until<F>(msg: &StartMessage, interrupt: F) -> ResultMessage
where
    F: Future + Unpin,
{
    let source = match compose(msg) {
        Ok(source) => source,
        Err(e) => return ResultMessage::err(format!("Failed to encode input: {}", e)),
    };

    let mut context = Context::default();
    context
        .runtime_limits_mut()
        .set_loop_iteration_limit(msg.limits.loop_iteration_limit);
    context
        .runtime_limits_mut()
        .set_recursion_limit(msg.limits.recursion_limit);

    let script = match Script::parse(Source::from_bytes(&source), None, &mut context) {
        Ok(script) => script,
        Err(e) => return ResultMessage::err(e.to_string()),
    };

    let evaluation = Box::pin(script.evaluate_async_with_budget(&mut context, EVAL_BUDGET));
    let value = match futures::executor::block_on(future::select(evaluation, interrupt)) {
        Either::Left((Ok(value), _)) => value,
        Either::Left((Err(e), _)) => {
            debug!(package = %msg.package_name, error = %e, "Snippet evaluation aborted");
            return ResultMessage::err(e.to_string());
        }
        Either::Right(_) => {
            debug!(package = %msg.package_name, "Snippet evaluation interrupted");
            return ResultMessage::err(INTERRUPTED_MESSAGE);
        }
    };

    let Some(text) = value.as_string().map(|s| s.to_std_string_escaped()) else {
        return ResultMessage::err("Sandbox produced no result message");
    };

    match serde_json::from_str::<Value>(&text) {
        Ok(Value::Object(map)) => {
            let success = map.get("success").and_then(Value::as_bool).unwrap_or(false);
            if success {
                ResultMessage::ok(map.get("output").cloned().unwrap_or(Value::Null))
            } else {
                let error = map
                    .get("error")
                    .and_then(Value::as_str)
                    .filter(|e| !e.is_empty())
                    .unwrap_or("Snippet failed")
                    .to_string();
                ResultMessage::err(error)
            }
        }
        Ok(_) => ResultMessage::err("Malformed result message"),
        Err(e) => ResultMessage::err(format!("Failed to parse result: {}", e)),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::protocol::Limits;
    use serde_json::json;

    fn start(code: &str, input: Value) -> StartMessage {
        StartMessage {
            package_name: "test".into(),
            code: code.into(),
            input,
            binding_names: vec!["helper".into()],
            binding_source: "module.exports = { twice: function (x) { return x * 2; } };".into(),
            limits: Limits::default(),
        }
    }

    #[test]
    fn test_evaluate_returns_value() {
        let result = evaluate(&start("return input.map(x => helper.twice(x));", json!([1, 2, 3])));
        assert_eq!(result, ResultMessage::ok(json!([2, 4, 6])));
    }

    #[test]
    fn test_pkg_alias_is_bound() {
        let result = evaluate(&start("return pkg.twice(input);", json!(21)));
        assert_eq!(result.output, json!(42));
    }

    #[test]
    fn test_undefined_becomes_null() {
        let result = evaluate(&start("var x = input;", json!({"a": 1})));
        assert!(result.success);
        assert_eq!(result.output, Value::Null);
    }

    #[test]
    fn test_thrown_error_message() {
        let result = evaluate(&start("throw new Error('bad input');", json!(null)));
        assert!(!result.success);
        assert_eq!(result.error.as_deref(), Some("bad input"));
        assert_eq!(result.output, Value::Null);
    }

    #[test]
    fn test_thrown_string() {
        let result = evaluate(&start("throw 'plain';", json!(null)));
        assert_eq!(result.error.as_deref(), Some("plain"));
    }

    #[test]
    fn test_syntax_error_is_contained() {
        let result = evaluate(&start("return }); (function(){", json!(null)));
        assert!(!result.success);
        assert!(result.error.is_some());
    }

    #[test]
    fn test_input_with_quotes_round_trips() {
        let input = json!({"text": "it's \"quoted\"\n", "__proto__": 1});
        let result = evaluate(&start("return input.text;", input));
        assert_eq!(result.output, json!("it's \"quoted\"\n"));
    }

    #[test]
    fn test_loop_limit_stops_runaway_code() {
        let mut msg = start("while (true) {}", json!(null));
        msg.limits.loop_iteration_limit = 10_000;
        let result = evaluate(&msg);
        assert!(!result.success);
    }

    #[test]
    fn test_interrupt_stops_nested_loops() {
        let msg = start(
            "while (true) { for (var i = 0; i < 1000; i++) {} }",
            json!(null),
        );
        let result = evaluate_until(&msg, future::ready(()));
        assert!(!result.success);
        assert_eq!(result.error.as_deref(), Some(INTERRUPTED_MESSAGE));
    }

    #[test]
    fn test_interrupt_stops_loop_inside_called_function() {
        let (stop, stopped) = futures::channel::oneshot::channel::<()>();
        let handle = std::thread::spawn(move || {
            let msg = start(
                "function spin() { for (;;) { for (var i = 0; i < 10; i++) {} } } return spin();",
                json!(null),
            );
            evaluate_until(&msg, stopped)
        });
        std::thread::sleep(std::time::Duration::from_millis(50));
        drop(stop);
        let result = handle.join().unwrap();
        assert_eq!(result.error.as_deref(), Some(INTERRUPTED_MESSAGE));
    }

    #[test]
    fn test_no_host_globals() {
        let result = evaluate(&start(
            "return [typeof require, typeof process, typeof fetch];",
            json!(null),
        ));
        assert_eq!(result.output, json!(["undefined", "undefined", "undefined"]));
    }
}
