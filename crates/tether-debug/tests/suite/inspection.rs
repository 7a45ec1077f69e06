use std::collections::HashMap;

use tether_dap::mock::{numbered_locals, ContinueBehavior, MockAdapter, MockAdapterConfig};
use tether_debug::ErrorKind;

use crate::harness::{controller_for, launch_config, stopped_at_entry};

#[tokio::test]
async fn evaluate_uses_the_selected_frame() {
    let (mock, controller) = stopped_at_entry(MockAdapterConfig::default()).await;

    let value = controller.evaluate("x", None, None).await.unwrap();
    assert_eq!(value.result, "7");
    assert_eq!(value.type_.as_deref(), Some("int"));
    assert_eq!(Some(value.frame_id), controller.current_top_frame_id());

    let caller = controller.up().unwrap();
    let value = controller.evaluate("x", None, Some("watch")).await.unwrap();
    assert_eq!(value.frame_id, caller.id);

    let sent = mock.requests_for("evaluate");
    assert_eq!(sent[1].arguments["frameId"], caller.id);
    assert_eq!(sent[1].arguments["context"], "watch");
}

#[tokio::test]
async fn evaluation_errors_come_back_as_adapter_rejections() {
    let (_mock, controller) = stopped_at_entry(MockAdapterConfig::default()).await;

    let err = controller.evaluate("missing", None, None).await.unwrap_err();
    assert_eq!(err.kind(), ErrorKind::AdapterRejected);
    assert!(err.to_string().contains("NameError"), "{err}");

    let err = controller.evaluate("  ", None, None).await.unwrap_err();
    assert_eq!(err.kind(), ErrorKind::InvalidArgument);
    let err = controller.evaluate("x", None, Some("shell")).await.unwrap_err();
    assert_eq!(err.kind(), ErrorKind::InvalidArgument);
}

#[tokio::test]
async fn print_helpers_send_the_same_request_as_evaluate() {
    let (mock, controller) = stopped_at_entry(MockAdapterConfig::default()).await;

    controller.evaluate("name", None, None).await.unwrap();
    controller.pretty_print("name", None).await.unwrap();
    let typed = controller.whatis("name", None).await.unwrap();
    assert_eq!(typed.type_.as_deref(), Some("str"));

    let sent = mock.requests_for("evaluate");
    assert_eq!(sent.len(), 3);
    assert_eq!(sent[0].arguments, sent[1].arguments);
    assert_eq!(sent[1].arguments, sent[2].arguments);
    assert_eq!(sent[0].arguments["context"], "repl");
}

#[tokio::test]
async fn statements_run_in_repl_context() {
    let (mock, controller) = stopped_at_entry(MockAdapterConfig::default()).await;

    let done = controller.execute_statement("y = x + 1", None).await.unwrap();
    assert_eq!(done.result, "");
    assert_eq!(
        mock.requests_for("evaluate")[0].arguments["context"],
        "repl"
    );
}

#[tokio::test]
async fn stale_frame_ids_are_refused_without_contacting_the_adapter() {
    let (mock, controller) = stopped_at_entry(MockAdapterConfig::default()).await;
    let old_frame = controller.current_top_frame_id().unwrap();
    controller.next().await.unwrap();

    let err = controller
        .evaluate("x", Some(old_frame), None)
        .await
        .unwrap_err();
    assert_eq!(err.kind(), ErrorKind::FrameUnavailable);
    let err = controller
        .get_variables(Some(old_frame), None)
        .await
        .unwrap_err();
    assert_eq!(err.kind(), ErrorKind::FrameUnavailable);
    assert!(mock.requests_for("evaluate").is_empty());
    assert!(mock.requests_for("scopes").is_empty());
}

#[tokio::test]
async fn inspection_while_running_has_no_frame() {
    let mock = MockAdapter::spawn_with_config(MockAdapterConfig {
        continue_behavior: ContinueBehavior::Hang,
        ..Default::default()
    })
    .await
    .unwrap();
    let controller = controller_for(&mock);
    controller.launch(launch_config(false)).await.unwrap();

    let err = controller.evaluate("x", None, None).await.unwrap_err();
    assert_eq!(err.kind(), ErrorKind::FrameUnavailable);
    let err = controller.get_variables(None, None).await.unwrap_err();
    assert_eq!(err.kind(), ErrorKind::FrameUnavailable);
    let err = controller.stack_trace().unwrap_err();
    assert_eq!(err.kind(), ErrorKind::FrameUnavailable);
    assert!(mock.requests_for("evaluate").is_empty());
}

#[tokio::test]
async fn large_scopes_are_capped_with_a_hint() {
    let (_mock, controller) = stopped_at_entry(MockAdapterConfig {
        locals: numbered_locals(150),
        ..Default::default()
    })
    .await;

    let report = controller.get_variables(None, None).await.unwrap();
    let locals = &report.scopes[0];
    assert_eq!(locals.name, "Locals");
    assert_eq!(locals.total, 150);
    assert_eq!(locals.variables.len(), 100);
    assert_eq!(locals.elided.len(), 50);
    assert_eq!(locals.elided[0], "v100");
    assert!(report.text.contains("name | type | value"), "{}", report.text);
    assert!(report.text.contains("v099 | int | 99"), "{}", report.text);
    assert!(report.text.contains("Use evaluate"), "{}", report.text);

    let globals = &report.scopes[1];
    assert_eq!(globals.name, "Globals");
    assert!(globals.elided.is_empty());
}

#[tokio::test]
async fn scope_filter_is_case_insensitive() {
    let (_mock, controller) = stopped_at_entry(MockAdapterConfig::default()).await;

    let report = controller.get_variables(None, Some("globals")).await.unwrap();
    assert_eq!(report.scopes.len(), 1);
    assert_eq!(report.scopes[0].variables[0].name, "__name__");

    let report = controller
        .get_variables(None, Some("registers"))
        .await
        .unwrap();
    assert!(report.scopes.is_empty());
    assert_eq!(report.available_scopes, vec!["Locals", "Globals"]);
    assert!(report.text.contains("Locals, Globals"), "{}", report.text);
}

#[tokio::test]
async fn get_source_unquotes_the_evaluated_repr() {
    let expression = "__import__('inspect').getsource(handler)".to_string();
    let (mock, controller) = stopped_at_entry(MockAdapterConfig {
        evaluate_results: HashMap::from([(
            expression.clone(),
            "'def handler():\\n    return 1\\n'".to_string(),
        )]),
        ..Default::default()
    })
    .await;

    let report = controller.get_source("handler", None).await.unwrap();
    assert_eq!(report.source, "def handler():\n    return 1\n");
    assert_eq!(
        mock.requests_for("evaluate")[0].arguments["expression"],
        expression.as_str()
    );
}
