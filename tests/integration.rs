
use std::collections::HashMap;
use std::sync::Arc;

use fixtures::{generate_random_whitespace, generate_random_whitespace_at_least_one, isolated};
use serde_json::{Value, json};
use whiskers::{
    HelperCall, RegistrationKind, Registry, Template, WhiskersError, WhiskersResult, escape_path,
};

fn shout(call: &mut HelperCall<'_>) -> WhiskersResult<Value> {
    let text = call.param(0).and_then(Value::as_str).unwrap_or_default();
    Ok(Value::String(text.to_uppercase()))
}

#[test]
#[ntest::timeout(100)]
fn test_validate_hello() {
    let template = isolated("Hello {{name}}");
    assert!(template.validate(["name"]).is_ok());

    let err = template.validate(["other"]).unwrap_err();
    assert_eq!(
        err.to_string(),
        r#"Invalid variable reference name (not in ["other"])"#
    );
}

#[test]
#[ntest::timeout(100)]
fn test_validate_escaped_segment() {
    assert_eq!(escape_path("user.first name"), "user.[first name]");

    let template = isolated("{{user.[first name]}}");
    assert!(template.validate(["user.first name"]).is_ok());
    assert!(template.validate(["user"]).is_ok());
    assert!(template.validate(["first name"]).is_err());
}

#[test]
#[ntest::timeout(100)]
fn test_validate_relaxed_in_blocks() {
    let template = isolated(
        "{{#each unknown_list}}{{whatever}}{{else}}{{nothing}}{{/each}}{{#if alsoUnknown}}{{x.y}}{{/if}}",
    );
    assert!(template.validate(Vec::<String>::new()).is_ok());

    let template = isolated("{{#if flag}}{{inside}}{{/if}}{{outside}}");
    let err = template.validate(["flag"]).unwrap_err();
    assert!(matches!(
        err,
        WhiskersError::InvalidReference { ref reference, .. } if reference == "outside"
    ));
}

#[test]
#[ntest::timeout(100)]
fn test_validate_sees_new_helpers() {
    let template = isolated("{{shout name}}");
    let clone = template.clone();
    clone.register_helper("shout", shout);

    // Only the clone knows `shout`; for the source it is a field reference.
    assert!(clone.validate(["name"]).is_ok());
    assert!(template.validate(["name"]).is_err());
}

#[test]
#[ntest::timeout(100)]
fn test_rename_scenarios() {
    let template = isolated("{{user.id}}");
    template.rename([("user", "customer")]).unwrap();
    assert_eq!(template.print(), "{{customer.id}}");

    let template = isolated("{{[user name].id}}");
    template.rename([("user name", "client name")]).unwrap();
    assert_eq!(template.print(), "{{[client name].id}}");

    let out = template
        .exec(&json!({"client name": {"id": 7}}))
        .unwrap();
    assert_eq!(out, "7");
}

#[test]
#[ntest::timeout(100)]
fn test_rename_longest_key_first() {
    let template = isolated("{{[user name].id}} {{user.id}}");
    let mapping: HashMap<&str, &str> = [("user", "a"), ("user name", "b")].into_iter().collect();
    template.rename(mapping).unwrap();
    assert_eq!(template.print(), "{{b.id}} {{a.id}}");
}

#[test]
#[ntest::timeout(100)]
fn test_rename_empty_mapping_is_idempotent() {
    let template = isolated("{{a.b}} {{#each c}}{{d}}{{/each}} {{> p e}}");
    let before = template.print_ast();
    template.rename(Vec::<(String, String)>::new()).unwrap();
    assert_eq!(template.print_ast(), before);
}

#[test]
#[ntest::timeout(100)]
fn test_rename_through_clone_is_shared() {
    let template = isolated("Hi {{user.name}}");
    let clone = template.clone();
    clone.rename([("user", "member")]).unwrap();

    assert_eq!(template.print(), "Hi {{member.name}}");
    assert!(template.validate(["member"]).is_ok());
    assert!(template.validate(["user"]).is_err());
}

#[test]
#[ntest::timeout(100)]
fn test_fork_does_not_share_tree() {
    let template = isolated("Hi {{user.name}}");
    let fork = template.fork();
    fork.rename([("user", "member")]).unwrap();
    assert_eq!(template.print(), "Hi {{user.name}}");
    assert_eq!(fork.print(), "Hi {{member.name}}");
}

#[test]
#[ntest::timeout(100)]
fn test_clone_registrations_are_independent() {
    let template = isolated("{{> header}}");
    template.register_partial("header", "source header");
    let clone = template.clone();

    clone.register_partial("footer", "f");
    clone.register_helper("shout", shout);
    assert!(template.find_partial("footer").is_none());
    assert!(!template.has_helper("shout"));

    // Copied entries are still present on the clone.
    assert_eq!(clone.exec(&json!({})).unwrap(), "source header");
}

#[test]
#[should_panic(expected = "Helper shout already registered")]
fn test_duplicate_helper_is_fatal() {
    let template = isolated("");
    template.register_helper("shout", shout);
    template.register_helper("shout", shout);
}

#[test]
#[should_panic(expected = "Partial p already registered")]
fn test_duplicate_identical_partial_is_fatal() {
    let template = isolated("");
    template.register_partial("p", "same");
    template.register_partial("p", "same");
}

#[test]
#[ntest::timeout(100)]
fn test_try_register_reports_conflict_without_applying() {
    let template = isolated("{{> p}}");
    template.try_register_partial("p", "first").unwrap();
    let err = template.try_register_partial("p", "second").unwrap_err();
    assert!(matches!(
        err,
        WhiskersError::AlreadyRegistered { kind: RegistrationKind::Partial, .. }
    ));
    assert_eq!(template.exec(&json!({})).unwrap(), "first");
}

#[test]
#[ntest::timeout(100)]
fn test_partial_resolution_tiers() {
    let registry = Arc::new(Registry::new());
    registry.register_partial("banner", "global {{title}}", false);

    let template = Template::with_registry("[{{> banner}}]", false, Arc::clone(&registry));
    assert_eq!(template.exec(&json!({"title": "T"})).unwrap(), "[global T]");

    template.register_partial("banner", "local {{title}}");
    assert_eq!(template.exec(&json!({"title": "T"})).unwrap(), "[local T]");

    // Another template on the same registry still sees the global one.
    let other = Template::with_registry("{{> banner}}", false, registry);
    assert_eq!(other.exec(&json!({"title": "U"})).unwrap(), "global U");
}

#[test]
#[ntest::timeout(100)]
fn test_process_global_registry() {
    Registry::global().register_partial("integration_global_footer", "(c) {{year}}", false);
    let template = Template::parse("{{> integration_global_footer}}").unwrap();
    assert_eq!(template.exec(&json!({"year": 2024})).unwrap(), "(c) 2024");
    assert!(Registry::global().has_helper("each"));
}

#[test]
#[ntest::timeout(100)]
fn test_partial_template_registration() {
    let template = isolated("{{> row}}{{> row}}");
    template.register_partial_template("row", Template::parse("<{{x}}>").unwrap());
    assert_eq!(template.exec(&json!({"x": "&"})).unwrap(), "<&amp;><&amp;>");
}

#[test]
#[ntest::timeout(100)]
fn test_partial_inherits_unescaped_flag() {
    let template = Template::with_registry("{{> p}}", true, Arc::new(Registry::new()));
    template.register_partial("p", "{{html}}");
    assert_eq!(template.exec(&json!({"html": "<i>"})).unwrap(), "<i>");
}

#[test]
#[ntest::timeout(100)]
fn test_exec_returns_helper_errors() {
    let template = isolated("{{fail}}");
    let fail = |call: &mut HelperCall<'_>| -> WhiskersResult<Value> { Err(call.error("nope")) };
    template.register_helper("fail", fail);

    let err = template.exec(&json!({})).unwrap_err();
    assert_eq!(err.to_string(), "Helper fail failed: nope");
}

#[test]
#[should_panic(expected = "helper fault")]
fn test_exec_propagates_helper_panics() {
    let template = isolated("{{boom}}");
    let boom = |_: &mut HelperCall<'_>| -> WhiskersResult<Value> { panic!("helper fault") };
    template.register_helper("boom", boom);
    let _ = template.exec(&json!({}));
}

#[test]
#[ntest::timeout(100)]
fn test_exec_reuses_parsed_tree() {
    let template = isolated("{{a}}");
    template.exec(&json!({"a": 1})).unwrap();
    let first = template.tree().unwrap();
    template.exec(&json!({"a": 2})).unwrap();
    assert!(Arc::ptr_eq(&first, &template.tree().unwrap()));
}

#[test]
#[ntest::timeout(100)]
fn test_parse_error_is_recoverable() {
    let template = isolated("{{#if a}}x{{/unless}}");
    let err = template.exec(&json!({})).unwrap_err();
    assert!(matches!(err, WhiskersError::Parse(_)));
    assert!(err.to_string().contains("if doesn't match unless"));
    assert!(template.validate(["a"]).is_err());
    assert!(template.print_ast().starts_with("PARSER ERROR: "));
}

#[test]
#[ntest::timeout(100)]
fn test_block_helper_with_else() {
    let template = isolated("{{#if user}}Hi {{user.name}}{{else}}Anonymous{{/if}}");
    assert_eq!(template.exec(&json!({"user": {"name": "Ann"}})).unwrap(), "Hi Ann");
    assert_eq!(template.exec(&json!({})).unwrap(), "Anonymous");
}

#[test]
#[ntest::timeout(100)]
fn test_custom_block_helper() {
    let template = isolated("{{#twice}}ab{{/twice}}");
    let twice = |call: &mut HelperCall<'_>| -> WhiskersResult<Value> {
        let once = call.render(Default::default())?;
        Ok(Value::String(format!("{once}{once}")))
    };
    template.register_helper("twice", twice);
    assert_eq!(template.exec(&json!({})).unwrap(), "abab");
}

type HelperFn = fn(&mut HelperCall<'_>) -> WhiskersResult<Value>;

fn one(_: &mut HelperCall<'_>) -> WhiskersResult<Value> {
    Ok(json!("1"))
}

fn two(_: &mut HelperCall<'_>) -> WhiskersResult<Value> {
    Ok(json!("2"))
}

#[test]
#[ntest::timeout(100)]
fn test_register_helpers_in_bulk() {
    let template = isolated("{{a}}{{b}}");
    template.register_helpers([("a", one as HelperFn), ("b", two as HelperFn)]);
    assert_eq!(template.exec(&json!({})).unwrap(), "12");
}

#[test]
#[ntest::timeout(100)]
fn test_whitespace_inside_tags() {
    let source = format!(
        "{{{{#{}each{}items{}}}}}{{{{{}name{}}}}}{{{{/{}each{}}}}}",
        generate_random_whitespace(),
        generate_random_whitespace_at_least_one(),
        generate_random_whitespace(),
        generate_random_whitespace(),
        generate_random_whitespace(),
        generate_random_whitespace(),
        generate_random_whitespace(),
    );
    let template = isolated(&source);
    let out = template
        .exec(&json!({"items": [{"name": "a"}, {"name": "b"}]}))
        .unwrap();
    assert_eq!(out, "ab", "source was {source:?}");
}

#[test]
#[ntest::timeout(100)]
fn test_log_helper_renders_empty() {
    let _ = tracing_subscriber::fmt()
        .with_test_writer()
        .with_env_filter("whiskers=trace")
        .try_init();
    let template = isolated("a{{log \"seen\" level=\"warn\"}}b");
    assert_eq!(template.exec(&json!({})).unwrap(), "ab");
}

#[test]
#[ntest::timeout(1000)]
fn test_concurrent_exec_and_registration() {
    let template = isolated("{{> p}}");
    template.register_partial("p", "{{v}}");

    std::thread::scope(|scope| {
        for i in 0..4 {
            let clone = template.clone();
            scope.spawn(move || {
                clone.register_partial(format!("extra{i}"), "x");
                for _ in 0..20 {
                    assert_eq!(clone.exec(&json!({"v": i})).unwrap(), i.to_string());
                }
            });
        }
        for _ in 0..20 {
            assert_eq!(template.exec(&json!({"v": "base"})).unwrap(), "base");
        }
    });
    assert!(template.find_partial("extra0").is_none());
}

#[test]
#[ntest::timeout(1000)]
fn test_file_loading() {
    let dir = tempfile::tempdir().unwrap();
    let main = dir.path().join("page.hbs");
    let header = dir.path().join("header.hbs");
    let footer = dir.path().join("footer.html");
    std::fs::write(&main, "{{> header}}|{{> footer}}").unwrap();
    std::fs::write(&header, "<h1>{{title}}</h1>").unwrap();
    std::fs::write(&footer, "end").unwrap();

    let template = Template::parse_file(&main).unwrap();
    template.register_partial_files([&header, &footer]).unwrap();
    assert_eq!(
        template.exec(&json!({"title": "T"})).unwrap(),
        "<h1>T</h1>|end"
    );

    let missing = dir.path().join("missing.hbs");
    assert!(matches!(
        Template::parse_file(&missing),
        Err(WhiskersError::Io { .. })
    ));
    assert!(matches!(
        template.register_partial_file(&missing, "missing"),
        Err(WhiskersError::Io { .. })
    ));
    assert!(template.find_partial("missing").is_none());
}
