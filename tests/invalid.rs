use threadlocal_context as tlc;
use tlc::{BoundLogger, ContextClass, ContextError};
use serde_json::json;

// A logger with an ordinary per-logger mapping cannot be used with tmp_bind:
// the call fails straight away and the logger's context stays as it was.
#[test]
fn test_tmp_bind_rejects_plain_context_class() {
    let logger: BoundLogger = BoundLogger::wrap(ContextClass::Plain).bind([("a", 1)]);
    let err = tlc::with_tmp_bind(&logger, [("b", 2)], |_| unreachable!("scope must not run"))
        .unwrap_err();
    match err {
        ContextError::Configuration { class } => assert!(class.contains("Map"), "{class}"),
        other => panic!("expected configuration error, got {other:?}"),
    }
    assert_eq!(logger.context().to_json(), json!({"a": 1}));
}

#[test]
fn test_binding_without_separator() {
    assert_eq!(
        tlc::parse_binding("user").unwrap_err(),
        ContextError::InvalidBinding("user".into())
    );
    assert!(tlc::parse_binding("=1").is_err());
}

#[test]
fn test_binding_values_fall_back_to_strings() {
    assert_eq!(tlc::parse_binding("n=42").unwrap(), ("n".to_string(), json!(42)));
    assert_eq!(
        tlc::parse_binding("who=alice").unwrap(),
        ("who".to_string(), json!("alice"))
    );
    assert_eq!(
        tlc::parse_binding("q=a=b").unwrap(),
        ("q".to_string(), json!("a=b"))
    );
}
