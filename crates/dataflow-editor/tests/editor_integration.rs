//! End-to-end tests driving the editor through raw JSON documents

use std::rc::Rc;

use dataflow_editor::{Editor, VecActionSink};

const SPECIFICATION: &str = r#"{
  "version": "1.0",
  "nodes": [
    {
      "name": "Node",
      "abstract": true,
      "interfaces": [
        { "name": "in", "direction": "input" },
        { "name": "out", "direction": "output" }
      ]
    },
    {
      "name": "Threshold",
      "extends": ["Node"],
      "category": "Filters",
      "properties": [
        { "name": "threshold", "type": "number", "default": 0.5 },
        { "name": "run", "type": "button-api", "procedureName": "dataflow_run" }
      ]
    },
    {
      "name": "Merge",
      "category": "Combiners",
      "interfaces": [
        { "name": "result", "direction": "output" },
        {
          "name": "operand",
          "direction": "input",
          "dynamic": { "countProperty": "operandCount" }
        }
      ],
      "properties": [
        { "name": "operandCount", "type": "integer", "default": 2 }
      ]
    }
  ]
}"#;

const DATAFLOW: &str = r#"{
  "version": "1.0",
  "graphs": [
    {
      "id": "main",
      "name": "Main",
      "nodes": [
        {
          "id": "t1",
          "name": "Threshold",
          "interfaces": [
            { "name": "in", "id": "t1-in", "direction": "input" },
            { "name": "out", "id": "t1-out", "direction": "output" }
          ],
          "properties": [{ "name": "threshold", "value": 0.25 }],
          "position": { "x": 0, "y": 0 }
        },
        {
          "id": "t2",
          "name": "Threshold",
          "interfaces": [
            { "name": "in", "id": "t2-in", "direction": "input" },
            { "name": "out", "id": "t2-out", "direction": "output" }
          ],
          "position": { "x": 200, "y": 0 }
        }
      ],
      "connections": [
        {
          "id": "c1",
          "from": "t1-out",
          "to": "t2-in",
          "anchors": [{ "x": 90, "y": 15 }, { "x": 140, "y": 30 }]
        }
      ]
    }
  ]
}"#;

async fn loaded_editor() -> Editor {
    let mut editor = Editor::new();
    editor
        .load_specification_text(SPECIFICATION, None)
        .await
        .unwrap();
    editor.load_dataflow_text(DATAFLOW).unwrap();
    editor
}

#[tokio::test]
async fn test_document_round_trip_preserves_structure() {
    let mut editor = loaded_editor().await;

    let graph = editor.active_graph().unwrap();
    assert_eq!(graph.nodes().len(), 2);
    assert_eq!(graph.connections().len(), 1);
    assert_eq!(graph.connections()[0].anchors.len(), 2);
    assert_eq!(
        graph.find_node("t1").unwrap().property_value("threshold"),
        Some(&serde_json::json!(0.25))
    );

    let saved = editor.save_dataflow();
    editor.load_dataflow(saved.clone()).unwrap();
    let reloaded = editor.save_dataflow();

    assert_eq!(
        serde_json::to_value(&saved).unwrap(),
        serde_json::to_value(&reloaded).unwrap()
    );
}

#[tokio::test]
async fn test_transactional_undo_of_connection_with_anchors() {
    let mut editor = loaded_editor().await;

    editor
        .active_graph_mut()
        .unwrap()
        .remove_connection("c1")
        .unwrap();
    assert!(editor.active_graph().unwrap().connections().is_empty());

    // One undo restores the connection and both anchors in original order.
    editor.undo();
    let graph = editor.active_graph().unwrap();
    let connection = graph.find_connection("c1").unwrap();
    assert_eq!(connection.anchors.len(), 2);
    assert_eq!(connection.anchors[0].x, 90.0);
    assert_eq!(connection.anchors[1].x, 140.0);
}

#[tokio::test]
async fn test_explicit_transaction_round_trips_atomically() {
    let mut editor = loaded_editor().await;

    editor.history().start_transaction().unwrap();
    editor
        .active_graph_mut()
        .unwrap()
        .remove_connection("c1")
        .unwrap();
    editor.active_graph_mut().unwrap().remove_node("t2").unwrap();
    editor.history().commit_transaction();

    assert_eq!(editor.active_graph().unwrap().nodes().len(), 1);

    editor.undo();
    let graph = editor.active_graph().unwrap();
    assert_eq!(graph.nodes().len(), 2);
    assert_eq!(graph.connections().len(), 1);

    editor.redo();
    let graph = editor.active_graph().unwrap();
    assert_eq!(graph.nodes().len(), 1);
    assert!(graph.connections().is_empty());
}

#[tokio::test]
async fn test_dynamic_interface_count_follows_property() {
    let mut editor = loaded_editor().await;

    let merge = {
        let ty = editor.registry().get("Merge").unwrap();
        let arena = editor.arena().clone();
        let instance = ty.instantiate("main", &mut arena.borrow_mut()).unwrap();
        editor.active_graph_mut().unwrap().add_node(instance)
    };

    let operands = |editor: &Editor| {
        editor
            .active_graph()
            .unwrap()
            .find_node(&merge)
            .unwrap()
            .inputs
            .len()
    };
    assert_eq!(operands(&editor), 2);

    editor
        .set_property(&merge, "operandCount", serde_json::json!(4))
        .unwrap();
    assert_eq!(operands(&editor), 4);

    editor
        .set_property(&merge, "operandCount", serde_json::json!(1))
        .unwrap();
    assert_eq!(operands(&editor), 1);
}

#[tokio::test]
async fn test_discrepant_dataflow_is_rejected_with_context() {
    let mut editor = Editor::new();
    editor
        .load_specification_text(SPECIFICATION, None)
        .await
        .unwrap();

    let broken = DATAFLOW.replace("\"name\": \"in\",", "\"name\": \"sideband\",");
    let errors = editor.load_dataflow_text(&broken).unwrap_err();
    assert!(errors.iter().any(|e| e.contains("sideband")));
    assert!(editor.graphs().is_empty());
}

#[tokio::test]
async fn test_button_action_reaches_sink() {
    let sink = Rc::new(VecActionSink::new());
    let mut editor = Editor::with_action_sink(sink.clone());
    editor
        .load_specification_text(SPECIFICATION, None)
        .await
        .unwrap();
    editor.load_dataflow_text(DATAFLOW).unwrap();

    editor.trigger_property_action("t1", "run").unwrap();
    assert_eq!(sink.actions().len(), 1);
}
