#[cfg(test)]
mod tests {
    use crate::llm::anthropic::AnthropicAdapter;
    use crate::llm::gemini::GeminiAdapter;
    use crate::llm::mistral::MistralAdapter;
    use crate::llm::openai::OpenAiAdapter;
    use crate::llm::openai_responses::ResponsesAdapter;
    use crate::llm::provider::*;

    fn assistant_with_calls() -> Message {
        let mut msg = Message::assistant("working on it");
        msg.tool_calls = Some(vec![
            ToolCall::new("call_a", 0, "alpha", r#"{"x":1}"#),
            ToolCall::new("call_b", 1, "beta", r#"{"y":2}"#),
        ]);
        msg
    }

    #[test]
    fn test_openai_continuation_roundtrip() {
        let message = assistant_with_calls();
        let wire = OpenAiAdapter::convert_message(&message);
        assert_eq!(OpenAiAdapter::message_from_wire(&wire), message);
    }

    #[test]
    fn test_anthropic_continuation_roundtrip() {
        let message = assistant_with_calls();
        let (wire, _) = AnthropicAdapter::convert_messages(&[message.clone()]);
        assert_eq!(AnthropicAdapter::message_from_wire(&wire[0]), message);
    }

    #[test]
    fn test_mistral_continuation_keeps_call_order() {
        let message = assistant_with_calls();
        let wire = MistralAdapter::convert_message(&message);
        assert_eq!(wire["tool_calls"][0]["id"], "call_a");
        assert_eq!(wire["tool_calls"][1]["id"], "call_b");
        assert_eq!(wire["tool_calls"][0]["function"]["arguments"], r#"{"x":1}"#);
    }

    #[test]
    fn test_responses_continuation_keeps_argument_strings() {
        let message = assistant_with_calls();
        let (items, _) = ResponsesAdapter::convert_input(&[message]);
        // one output_text message + two function_call items
        assert_eq!(items.len(), 3);
        assert_eq!(items[1]["arguments"], r#"{"x":1}"#);
        assert_eq!(items[2]["arguments"], r#"{"y":2}"#);
    }

    /// A response with N signatures across text and function-call parts
    /// yields a continuation carrying exactly N signatures on the same
    /// part kinds.
    #[test]
    fn test_gemini_signature_count_is_preserved() {
        let mut call_one = ToolCall::new("gemini_call_1", 0, "alpha", "{}");
        call_one.metadata.thought_signature = Some("SIG_CALL_1".to_string());
        let mut call_two = ToolCall::new("gemini_call_2", 1, "beta", "{}");
        call_two.metadata.thought_signature = Some("SIG_CALL_2".to_string());

        let mut msg = Message::assistant("two calls coming");
        msg.tool_calls = Some(vec![call_one, call_two]);
        msg.thought_signatures = vec![
            "SIG_TEXT".to_string(),
            "SIG_CALL_1".to_string(),
            "SIG_CALL_2".to_string(),
        ];

        let (contents, _) = GeminiAdapter::convert_contents(&[msg]);
        let parts = &contents[0].parts;

        let text_sigs: Vec<&str> = parts
            .iter()
            .filter(|p| p.function_call.is_none())
            .filter_map(|p| p.thought_signature.as_deref())
            .collect();
        let call_sigs: Vec<&str> = parts
            .iter()
            .filter(|p| p.function_call.is_some())
            .filter_map(|p| p.thought_signature.as_deref())
            .collect();

        assert_eq!(text_sigs, vec!["SIG_TEXT"]);
        assert_eq!(call_sigs, vec!["SIG_CALL_1", "SIG_CALL_2"]);
        assert_eq!(text_sigs.len() + call_sigs.len(), 3);
    }

    #[test]
    fn test_responses_finish_inference() {
        use serde_json::json;
        let with = vec![json!({"type": "function_call"})];
        let without = vec![json!({"type": "message"})];
        assert_eq!(
            ResponsesAdapter::derive_finish(&with),
            FinishReason::ToolCalls
        );
        assert_eq!(
            ResponsesAdapter::derive_finish(&without),
            FinishReason::Stop
        );
    }

    /// Scenario: streamed Responses tool call assembled through the
    /// index-keyed assembler, the done event being authoritative.
    #[test]
    fn test_responses_streaming_assembly_shape() {
        let mut assembler = ToolCallAssembler::new();
        // output_item.added
        assembler.process_delta(0, Some("c1".into()), Some("webContentExtractor".into()), None);
        // three argument fragments
        assembler.process_delta(0, None, None, Some(r#"{""#.into()));
        assembler.process_delta(0, None, None, Some(r#"url":"http"#.into()));
        assembler.process_delta(0, None, None, Some(r#"s://..."}"#.into()));
        // arguments.done supplies the authoritative full string
        assembler.complete(0, None, None, r#"{"url":"https://..."}"#.into());

        let calls = assembler.into_tool_calls();
        assert_eq!(calls.len(), 1);
        assert_eq!(calls[0].id, "c1");
        assert_eq!(calls[0].function.name, "webContentExtractor");
        assert_eq!(calls[0].function.arguments, r#"{"url":"https://..."}"#);
    }
}
