//! Ready-made workflows.

use serde_json::json;

use weft_core::types::{Node, Workflow};

/// Names of the builtin templates.
pub fn names() -> Vec<&'static str> {
    vec!["data-transform", "summarize", "enrich"]
}

/// Look up a template by name.
pub fn get(name: &str) -> Option<Workflow> {
    match name {
        "data-transform" => Some(data_transform()),
        "summarize" => Some(summarize()),
        "enrich" => Some(enrich()),
        _ => None,
    }
}

/// Every builtin template.
pub fn all() -> Vec<Workflow> {
    names().into_iter().filter_map(get).collect()
}

/// Dedupe, sort and square a list of numbers with lodash.
fn data_transform() -> Workflow {
    Workflow::new("data-transform")
        .with_description("Clean up a list of numbers with lodash")
        .with_node(Node::input("numbers").with_default(json!([3, 1, 2, 3])))
        .with_node(
            Node::npm("clean", "lodash")
                .with_name("Sort and square")
                .with_code("return _.sortBy(_.uniq(input)).map(x => x * x);"),
        )
        .with_node(Node::output("result"))
        .with_edge("numbers", "clean")
        .with_edge("clean", "result")
}

fn summarize() -> Workflow {
    Workflow::new("summarize")
        .with_description("Summarize a piece of text with a model")
        .with_node(Node::input("text").with_default(json!("Paste the text to summarize here.")))
        .with_node(
            Node::npm("prompt", "lodash")
                .with_name("Build prompt")
                .with_code("return 'Summarize in three sentences:\\n\\n' + _.trim(String(input));"),
        )
        .with_node(
            Node::llm("summary", "openai", "gpt-4o-mini")
                .with_temperature(0.3)
                .with_max_tokens(300),
        )
        .with_node(Node::output("result"))
        .with_edge("text", "prompt")
        .with_edge("prompt", "summary")
        .with_edge("summary", "result")
}

/// Tag a record with an id and timestamp, validate its email, and describe it.
fn enrich() -> Workflow {
    Workflow::new("enrich")
        .with_description("Fan a record out to several packages and merge the results")
        .with_node(Node::input("record").with_default(json!({"email": "ada@example.com"})))
        .with_node(Node::npm("tag", "uuid").with_code("return { id: uuid.v4() };"))
        .with_node(
            Node::npm("stamp", "moment")
                .with_code("return { at: moment().toISOString() };"),
        )
        .with_node(
            Node::npm("check", "validator")
                .with_code("return { validEmail: validator.isEmail(String(input.email || '')) };"),
        )
        .with_node(
            Node::npm("merge", "lodash")
                .with_code("return _.merge.apply(null, [{}].concat(input));"),
        )
        .with_node(Node::llm("describe", "openai", "gpt-4o-mini").with_max_tokens(200))
        .with_node(Node::output("result"))
        .with_edge("record", "tag")
        .with_edge("record", "stamp")
        .with_edge("record", "check")
        .with_edge("tag", "merge")
        .with_edge("stamp", "merge")
        .with_edge("check", "merge")
        .with_edge("merge", "describe")
        .with_edge("merge", "result")
        .with_edge("describe", "result")
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::scheduler;

    #[test]
    fn test_all_templates_validate() {
        for wf in all() {
            assert!(scheduler::execution_order(&wf).is_ok(), "{} is invalid", wf.name);
        }
        assert_eq!(all().len(), names().len());
    }

    #[test]
    fn test_unknown_template() {
        assert!(get("nope").is_none());
    }
}
