#[cfg(feature = "serde")]
mod serde_tests {
    use serde_json::json;
    use whiskers::ast::{ContentStatement, Program, Statement};
    use whiskers::{ParseError, Template, WhiskersError, parse};

    #[test]
    fn test_statement_serialization() {
        let statement = Statement::Content(ContentStatement {
            original: "Hello".to_string(),
        });
        let serialized = serde_json::to_value(&statement).unwrap();
        assert_eq!(serialized, json!({"Content": {"original": "Hello"}}));
    }

    #[test]
    fn test_program_serialization() {
        let program = parse(
            "{{#each items as |item|}}{{item.[full name]}} {{fmt 1.50 true}}{{/each}}{{> p ctx k=v}}",
            false,
        )
        .unwrap();

        let serialized = serde_json::to_string(&program).unwrap();
        let deserialized: Program = serde_json::from_str(&serialized).unwrap();

        assert_eq!(deserialized, program);
        // Number spelling survives.
        assert!(serialized.contains(r#""original":"1.50""#));
    }

    #[test]
    fn test_template_serialization() {
        let template = Template::parse("Hello, {{name}}!").unwrap();
        let serialized = serde_json::to_value(&template).unwrap();
        assert_eq!(
            serialized,
            json!({"source": "Hello, {{name}}!", "unescaped": false})
        );

        let deserialized: Template = serde_json::from_value(serialized).unwrap();
        assert!(deserialized.is_parsed());

        let context = json!({"name": "World"});
        assert_eq!(
            template.exec(&context).unwrap(),
            deserialized.exec(&context).unwrap()
        );
    }

    #[test]
    fn test_template_deserialization_parses_source() {
        let err = serde_json::from_value::<Template>(json!({"source": "{{#if a}}"})).unwrap_err();
        assert!(err.to_string().starts_with("Failed to parse template"));
    }

    #[test]
    fn test_parse_error_serialization() {
        let Err(WhiskersError::Parse(err)) = Template::parse("{{#if a}}x{{/with}}") else {
            panic!("expected a parse error");
        };
        let serialized = serde_json::to_string(&err).unwrap();
        let deserialized: ParseError = serde_json::from_str(&serialized).unwrap();
        assert_eq!(deserialized, err);
        assert_eq!(deserialized.to_string(), err.to_string());
    }
}
