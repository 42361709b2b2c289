mod common;

use common::{enrollments, sql_reply, ScriptedExecutor, ScriptedLlm};
use sqlchat::execution_loop::{
    build_correction_prompt, QueryTerminal, SelfCorrectingQueryLoop, SqlErrorClass,
};
use sqlchat::db::ExecutionError;

#[tokio::test]
async fn test_exhausts_after_exactly_max_attempts() {
    let llm = ScriptedLlm::new().always_stream(&sql_reply("SELEC * FROM nowhere"));
    let executor = ScriptedExecutor::new();
    let query_loop = SelfCorrectingQueryLoop::new(5);

    let outcome = query_loop
        .resolve_query(&llm, &executor, "show me everything")
        .await
        .unwrap();

    assert_eq!(outcome.terminal, QueryTerminal::Exhausted);
    assert_eq!(outcome.attempts, 5);
    assert_eq!(llm.stream_calls(), 5);
    assert_eq!(executor.calls(), 5);
    assert!(outcome.table.is_none());
    assert_eq!(
        outcome.text,
        "Unable to produce a working SQL query after 5 attempts."
    );
    assert_eq!(outcome.failures.len(), 5);
    assert!(outcome
        .failures
        .iter()
        .all(|f| f.class == SqlErrorClass::SyntaxError));
}

#[tokio::test]
async fn test_succeeds_on_attempt_k() {
    for k in 1..=5usize {
        let llm = ScriptedLlm::new().always_stream(&sql_reply("SELECT 1"));
        let mut executor = ScriptedExecutor::new();
        for _ in 1..k {
            executor = executor.then_err("column \"state\" does not exist");
        }
        let executor = executor.then_ok(enrollments());
        let query_loop = SelfCorrectingQueryLoop::new(5);

        let outcome = query_loop
            .resolve_query(&llm, &executor, "enrollments please")
            .await
            .unwrap();

        assert_eq!(outcome.terminal, QueryTerminal::Success, "k = {}", k);
        assert_eq!(outcome.attempts, k);
        assert_eq!(llm.stream_calls(), k);
        assert_eq!(outcome.table, Some(enrollments()));
        assert_eq!(outcome.failures.len(), k - 1);
    }
}

#[tokio::test]
async fn test_three_failures_then_valid_uses_four_attempts() {
    let llm = ScriptedLlm::new().with_stream(&[
        &sql_reply("SELECT * FROM enrollment"),
        &sql_reply("SELECT * FROM enrolments"),
        &sql_reply("SELECT * FROM Enrollments"),
        &sql_reply("SELECT * FROM \"Enrollments\""),
    ]);
    let executor = ScriptedExecutor::new()
        .then_err("relation \"enrollment\" does not exist")
        .then_err("relation \"enrolments\" does not exist")
        .then_err("relation \"enrollments\" does not exist")
        .then_ok(enrollments());
    let query_loop = SelfCorrectingQueryLoop::new(5);

    let outcome = query_loop
        .resolve_query(&llm, &executor, "all enrollments")
        .await
        .unwrap();

    assert_eq!(outcome.terminal, QueryTerminal::Success);
    assert_eq!(outcome.attempts, 4);
    assert_eq!(outcome.sql.as_deref(), Some("SELECT * FROM \"Enrollments\""));
    assert_eq!(
        executor.statements().last().map(String::as_str),
        Some("SELECT * FROM \"Enrollments\"")
    );
}

#[tokio::test]
async fn test_retry_prompt_is_only_the_error() {
    let llm = ScriptedLlm::new().with_stream(&[
        &sql_reply("SELECT state FROM \"Enrollments\""),
        &sql_reply("SELECT \"Facility State\" FROM \"Enrollments\""),
    ]);
    let executor = ScriptedExecutor::new()
        .then_err("column \"state\" does not exist")
        .then_ok(enrollments());
    let query_loop = SelfCorrectingQueryLoop::new(5);

    query_loop
        .resolve_query(&llm, &executor, "NONE\n\nUser says: states\n\nAssistant:")
        .await
        .unwrap();

    let prompts = llm.stream_prompts();
    assert_eq!(prompts.len(), 2);
    assert!(prompts[0].contains("User says: states"));
    assert_eq!(
        prompts[1],
        build_correction_prompt(&ExecutionError::new("column \"state\" does not exist"))
    );
    assert!(!prompts[1].contains("User says"));
}

#[tokio::test]
async fn test_no_sql_block_is_a_conversational_success() {
    let llm = ScriptedLlm::new().with_stream(&["The Enrollments table tracks plan sign-ups."]);
    let executor = ScriptedExecutor::new();
    let query_loop = SelfCorrectingQueryLoop::new(5);

    let outcome = query_loop
        .resolve_query(&llm, &executor, "what is in the db?")
        .await
        .unwrap();

    assert_eq!(outcome.terminal, QueryTerminal::Success);
    assert_eq!(outcome.attempts, 1);
    assert!(outcome.table.is_none());
    assert_eq!(outcome.text, "The Enrollments table tracks plan sign-ups.");
    assert_eq!(executor.calls(), 0);
}

#[tokio::test]
async fn test_only_first_block_is_executed_and_narration_kept() {
    let reply = "Try this:\n```sql\nSELECT 1\n```\nor this:\n```sql\nSELECT 2\n```";
    let llm = ScriptedLlm::new().with_stream(&[reply]);
    let executor = ScriptedExecutor::new().then_ok(enrollments());
    let query_loop = SelfCorrectingQueryLoop::new(3);

    let outcome = query_loop.resolve_query(&llm, &executor, "q").await.unwrap();

    assert_eq!(executor.statements(), vec!["SELECT 1".to_string()]);
    assert!(outcome.text.starts_with(reply));
    assert!(outcome.text.ends_with("Data retrieved successfully."));
}

#[tokio::test]
async fn test_completion_failure_is_returned() {
    let llm = ScriptedLlm::new();
    let executor = ScriptedExecutor::new();
    let query_loop = SelfCorrectingQueryLoop::new(5);

    let result = query_loop.resolve_query(&llm, &executor, "q").await;

    assert!(result.is_err());
    assert_eq!(llm.stream_calls(), 1);
    assert_eq!(executor.calls(), 0);
}

#[tokio::test]
async fn test_completion_failure_keeps_earlier_failures() {
    // One reply only: the correction request after the column error fails.
    let llm = ScriptedLlm::new().with_stream(&[&sql_reply("SELECT state FROM enrollments")]);
    let executor = ScriptedExecutor::new().then_err("column \"state\" does not exist");
    let query_loop = SelfCorrectingQueryLoop::new(5);

    let aborted = query_loop
        .resolve_query(&llm, &executor, "q")
        .await
        .unwrap_err();

    assert_eq!(aborted.attempts, 2);
    assert_eq!(aborted.failures.len(), 1);
    assert_eq!(aborted.failures[0].attempt, 1);
    assert_eq!(aborted.failures[0].class, SqlErrorClass::ColumnNotFound);
    assert!(aborted.to_string().contains("no scripted stream reply"));
    assert_eq!(llm.stream_calls(), 2);
    assert_eq!(executor.calls(), 1);
}

#[tokio::test]
async fn test_multi_statement_rejection_is_fed_back() {
    let llm = ScriptedLlm::new().with_stream(&[
        &sql_reply("SET search_path TO public;\nSELECT * FROM enrollments;"),
        &sql_reply("SELECT * FROM public.enrollments"),
    ]);
    let executor = ScriptedExecutor::new()
        .then_err("cannot insert multiple commands into a prepared statement")
        .then_ok(enrollments());
    let query_loop = SelfCorrectingQueryLoop::new(5);

    let outcome = query_loop
        .resolve_query(&llm, &executor, "q")
        .await
        .unwrap();

    assert_eq!(outcome.attempts, 2);
    assert_eq!(
        executor.statements()[0],
        "SET search_path TO public;\nSELECT * FROM enrollments;"
    );
    assert!(llm.stream_prompts()[1]
        .contains("cannot insert multiple commands into a prepared statement"));
}
