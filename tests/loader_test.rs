use std::fs;

use flowcore::data::mapper::MappingDef;
use flowcore::definition::builder::FlowBuilder;
use flowcore::definition::loader;
use flowcore::definition::{FlowDefinition, LinkType};
use flowcore::error::DefinitionError;

const ORDER_FLOW: &str = r#"
id: "order-flow"
name: "Order Flow"
attributes:
  - name: count
    value: 5
tasks:
  - id: "log1"
    activity:
      ref: "log"
      input:
        message: "checking order"
  - id: "ship"
    name: "Ship Order"
    activity:
      ref: "echo"
      mappings:
        input:
          - type: assign
            value: "$flow.count"
            mapTo: "value"
  - id: "reject"
links:
  - from: "log1"
    to: "ship"
    type: expression
    value: "${count} > 3"
  - from: "log1"
    to: "reject"
    type: error
"#;

#[test]
fn test_load_flow_yaml_matches_builder() {
    let temp_dir = tempfile::tempdir().expect("Failed to create temp dir");
    let file_path = temp_dir.path().join("order_flow.yaml");
    fs::write(&file_path, ORDER_FLOW).expect("Failed to write temp file");

    let loaded = loader::load_flow_from_yaml(&file_path.to_string_lossy())
        .expect("Failed to load flow from YAML");

    let expected = FlowBuilder::new("order-flow")
        .name("Order Flow")
        .attr("count", 5)
        .task("log1", "log")
        .input("message", "checking order")
        .build()
        .task("ship", "echo")
        .name("Ship Order")
        .map_input(MappingDef::assign("value", "$flow.count"))
        .build()
        .noop("reject")
        .link_if("log1", "ship", "${count} > 3")
        .link_error("log1", "reject")
        .build();

    assert_eq!(loaded, expected);

    temp_dir.close().expect("Failed to close temp dir");
}

#[test]
fn test_load_flow_definition_wires_links() {
    let temp_dir = tempfile::tempdir().expect("Failed to create temp dir");
    let file_path = temp_dir.path().join("order_flow.yaml");
    fs::write(&file_path, ORDER_FLOW).expect("Failed to write temp file");

    let def = loader::load_flow_definition(&file_path.to_string_lossy())
        .expect("Failed to load flow definition");

    assert_eq!(def.id(), "order-flow");
    assert_eq!(def.name(), "Order Flow");
    assert!(def.link_expr_manager().is_some());

    let log1 = def.task("log1").expect("log1");
    assert!(log1.from_links().is_empty());
    assert_eq!(log1.to_links().len(), 2);
    assert_eq!(log1.name(), "log1");

    let ship = def.task("ship").expect("ship");
    assert_eq!(ship.name(), "Ship Order");
    assert_eq!(ship.from_links()[0].kind(), LinkType::Expression);
    assert_eq!(ship.from_links()[0].value(), Some("${count} > 3"));
    let config = ship.activity_config().expect("activity config");
    assert!(config.input_mapper().is_some());
    assert!(config.output_mapper().is_some());

    let reject = def.task("reject").expect("reject");
    assert!(reject.activity_config().is_none());
    assert_eq!(reject.from_links()[0].kind(), LinkType::Error);
}

#[test]
fn test_load_missing_file_fails() {
    let temp_dir = tempfile::tempdir().expect("Failed to create temp dir");
    let file_path = temp_dir.path().join("missing.yaml");

    let err = loader::load_flow_from_yaml(&file_path.to_string_lossy())
        .expect_err("missing file must fail");
    assert!(err.to_string().contains("Failed to read YAML file"));
}

#[test]
fn test_name_defaults_to_id() {
    let config = loader::parse_flow_yaml("id: bare\ntasks:\n  - id: a\n").expect("parse");
    let def = FlowDefinition::from_config(config).expect("valid flow");

    assert_eq!(def.name(), "bare");
    assert!(def.link_expr_manager().is_none());
}

#[test]
fn test_duplicate_task_rejected() {
    let config = FlowBuilder::new("dup").noop("a").noop("a").build();

    let err = FlowDefinition::from_config(config).expect_err("duplicate must fail");
    assert_eq!(err, DefinitionError::DuplicateTask("a".to_string()));
}

#[test]
fn test_unknown_link_endpoint_rejected() {
    let config = FlowBuilder::new("dangling").noop("a").link("a", "ghost").build();

    let err = FlowDefinition::from_config(config).expect_err("unknown endpoint must fail");
    assert_eq!(
        err,
        DefinitionError::UnknownTask {
            link_id: 0,
            task_id: "ghost".to_string(),
        }
    );
}

#[test]
fn test_expression_link_without_expression_rejected() {
    let yaml = r#"
id: "no-expr"
tasks:
  - id: a
  - id: b
links:
  - from: a
    to: b
    type: expression
"#;
    let config = loader::parse_flow_yaml(yaml).expect("parse");

    let err = FlowDefinition::from_config(config).expect_err("missing expression must fail");
    assert_eq!(err, DefinitionError::MissingExpression(0));
}

#[test]
fn test_invalid_expression_rejected() {
    let config = FlowBuilder::new("bad-expr")
        .noop("a")
        .noop("b")
        .link_if("a", "b", "(count > 3")
        .build();

    let err = FlowDefinition::from_config(config).expect_err("bad expression must fail");
    assert!(matches!(err, DefinitionError::InvalidExpression { link_id: 0, .. }));
}
