//! Remote replay, undo/redo across remote edits, observers and markers

use std::cell::RefCell;
use std::rc::Rc;

use folio_model::dev_utils::{get_data, set_data, stringify};
use folio_model::{
    Batch, BatchKind, Change, ChangeEvent, Document, ModelError, Node, Operation, Position, Range,
    Selection,
};
use serde_json::json;

fn pos(path: &[usize]) -> Position {
    Position::new("main", path.to_vec())
}

fn document(markup: &str) -> Document {
    let _ = tracing_subscriber::fmt().with_test_writer().try_init();
    let document = Document::new();
    set_data(&document, markup).unwrap();
    document
}

fn text(document: &Document) -> String {
    document.model().main_root().text_content()
}

#[test]
fn test_server_order_converges() -> anyhow::Result<()> {
    let server = document("<paragraph>abc</paragraph>");
    let base = server.version();

    // Two clients insert at the same offset, both based on `base`.
    let from_a = Operation::insert(pos(&[0, 1]), vec![Node::text("X")], base);
    let from_b = Operation::insert(pos(&[0, 1]), vec![Node::text("Y")], base);

    server.apply_remote(from_a)?;
    server.apply_remote(from_b)?;
    assert_eq!(text(&server), "aXYbc");
    assert_eq!(server.version(), base + 2);

    // Remote batches are not undoable locally.
    assert!(!server.can_undo());
    Ok(())
}

#[test]
fn test_remote_batch_is_rebased_as_a_sequence() -> anyhow::Result<()> {
    let document = document("<paragraph>abc</paragraph>");
    let base = document.version();
    document.change(|writer| writer.insert(&pos(&[0, 0]), vec![Node::text("12")]))?;

    let remote = vec![
        Operation::insert(pos(&[0, 3]), vec![Node::text("d")], base),
        Operation::insert(pos(&[0, 4]), vec![Node::text("e")], base + 1),
    ];
    document.apply_remote_batch(remote)?;
    assert_eq!(text(&document), "12abcde");
    Ok(())
}

#[test]
fn test_remote_remove_wins_over_local_move() -> anyhow::Result<()> {
    let document = document("<paragraph>abc</paragraph><paragraph>xyz</paragraph>");
    let base = document.version();

    // Local: move "b" into the second paragraph.
    let moved = Range::new(pos(&[0, 1]), pos(&[0, 2]));
    document.change(|writer| writer.move_range(&moved, &pos(&[1, 0])))?;
    assert_eq!(text(&document), "acbxyz");

    // Remote, concurrent: remove "abc".
    document.apply_remote(Operation::remove(pos(&[0, 0]), 3, base))?;
    assert_eq!(text(&document), "xyz");
    Ok(())
}

#[test]
fn test_undo_after_remote_edit() -> anyhow::Result<()> {
    let document = document("<paragraph>abc</paragraph>");
    document.change(|writer| writer.insert(&pos(&[0, 3]), vec![Node::text("X")]))?;

    let remote = Operation::insert(pos(&[0, 0]), vec![Node::text("Z")], document.version());
    document.apply_remote(remote)?;
    assert_eq!(text(&document), "ZabcX");

    assert!(document.undo()?);
    assert_eq!(text(&document), "Zabc");

    assert!(document.redo()?);
    assert_eq!(text(&document), "ZabcX");
    Ok(())
}

#[test]
fn test_undo_follows_content_back_from_the_graveyard() -> anyhow::Result<()> {
    let document = document("<paragraph>abc</paragraph>");
    document.change(|writer| writer.insert(&pos(&[0, 1]), vec![Node::text("X")]))?;
    document.change(|writer| writer.remove(&Range::new(pos(&[0]), pos(&[1]))))?;
    assert_eq!(text(&document), "");

    assert!(document.undo()?);
    assert_eq!(text(&document), "aXbc");
    assert!(document.undo()?);
    assert_eq!(text(&document), "abc");

    assert!(document.redo()?);
    assert_eq!(text(&document), "aXbc");
    Ok(())
}

#[test]
fn test_undo_of_removed_content_is_stale() -> anyhow::Result<()> {
    let document = document("<paragraph>abc</paragraph>");
    document.change(|writer| writer.insert(&pos(&[0, 1]), vec![Node::text("X")]))?;
    document.apply_remote(Operation::remove(pos(&[0]), 1, document.version()))?;
    let version = document.version();

    let result = document.undo();
    assert!(matches!(result, Err(ModelError::StaleInversion(_))), "{:?}", result);
    assert_eq!(document.version(), version);
    assert!(!document.can_redo());
    Ok(())
}

#[test]
fn test_redo_of_removed_content_is_stale() -> anyhow::Result<()> {
    let document = document("<paragraph>abc</paragraph>");
    document.change(|writer| writer.insert(&pos(&[0, 1]), vec![Node::text("X")]))?;
    assert!(document.undo()?);
    document.apply_remote(Operation::remove(pos(&[0]), 1, document.version()))?;
    assert!(document.can_redo());

    let result = document.redo();
    assert!(matches!(result, Err(ModelError::StaleInversion(_))), "{:?}", result);
    assert_eq!(text(&document), "");
    assert!(!document.can_redo());
    Ok(())
}

#[test]
fn test_remote_from_the_future_is_rejected() {
    let document = document("<paragraph>abc</paragraph>");
    let ahead = document.version() + 3;
    let insert = Operation::insert(pos(&[0, 0]), vec![Node::text("Z")], ahead);
    let result = document.apply_remote(insert);
    assert!(matches!(result, Err(ModelError::OperationVersionConflict { .. })));
    assert_eq!(text(&document), "abc");
}

#[test]
fn test_observer_sees_each_batch_once() {
    let document = document("<paragraph>abc</paragraph>");
    let events: Rc<RefCell<Vec<ChangeEvent>>> = Rc::default();
    let sink = events.clone();
    let id =
        document.add_observer(move |event: &ChangeEvent| sink.borrow_mut().push(event.clone()));

    document
        .change_with_batch(Batch::new().with_description("typing"), |writer| {
            writer.insert(&pos(&[0, 3]), vec![Node::text("d")])?;
            writer.insert(&pos(&[0, 4]), vec![Node::text("e")])
        })
        .unwrap();

    let batches: Vec<_> = events
        .borrow()
        .iter()
        .filter_map(|event| match event {
            ChangeEvent::BatchApplied { batch, changes } => Some((batch.clone(), changes.clone())),
            _ => None,
        })
        .collect();
    assert_eq!(batches.len(), 1);
    let (batch, changes) = &batches[0];
    assert_eq!(batch.kind, BatchKind::Local);
    assert_eq!(batch.description.as_deref(), Some("typing"));
    assert_eq!(batch.operations.len(), 2);
    assert_eq!(
        changes[0],
        Change::Insert {
            position: pos(&[0, 3]),
            length: 1
        }
    );
    assert_eq!(document.history().undo_description(), Some("typing"));

    document.remove_observer(id);
    events.borrow_mut().clear();
    document
        .change(|writer| writer.insert(&pos(&[0, 0]), vec![Node::text("z")]))
        .unwrap();
    assert!(events.borrow().is_empty());
}

#[test]
fn test_observer_can_read_the_document() {
    let document = document("<paragraph>abc</paragraph>");
    let seen = Rc::new(RefCell::new(String::new()));
    let (reader, sink) = (document.clone(), seen.clone());
    document.add_observer(move |event: &ChangeEvent| {
        if let ChangeEvent::BatchApplied { .. } = event {
            *sink.borrow_mut() = reader.model().main_root().text_content();
        }
    });

    document
        .change(|writer| writer.insert(&pos(&[0, 0]), vec![Node::text(">")]))
        .unwrap();
    assert_eq!(*seen.borrow(), ">abc");
}

#[test]
fn test_observer_cannot_reenter() -> anyhow::Result<()> {
    let document = document("<paragraph>abc</paragraph>");
    let rejected: Rc<RefCell<Vec<bool>>> = Rc::default();
    let (inner, sink) = (document.clone(), rejected.clone());
    document.add_observer(move |event: &ChangeEvent| {
        if let ChangeEvent::BatchApplied { .. } = event {
            let change = inner.change(|writer| writer.insert(&pos(&[0, 0]), vec![Node::text("!")]));
            let undo = inner.undo();
            let selection = inner.selection().collapse(pos(&[0, 0]));
            sink.borrow_mut().push(
                inner.is_applying()
                    && matches!(change, Err(ModelError::ApplicationInProgress))
                    && matches!(undo, Err(ModelError::ApplicationInProgress))
                    && matches!(selection, Err(ModelError::ApplicationInProgress)),
            );
        }
    });

    document.change(|writer| writer.insert(&pos(&[0, 3]), vec![Node::text("d")]))?;
    assert_eq!(*rejected.borrow(), vec![true]);
    assert_eq!(text(&document), "abcd");
    assert!(!document.is_applying());

    document.change(|writer| writer.insert(&pos(&[0, 4]), vec![Node::text("e")]))?;
    assert_eq!(*rejected.borrow(), vec![true, true]);
    assert_eq!(text(&document), "abcde");
    Ok(())
}

#[test]
fn test_failed_change_notifies_nobody() -> anyhow::Result<()> {
    let document = document("<paragraph>a[]bc</paragraph>");
    let events: Rc<RefCell<Vec<ChangeEvent>>> = Rc::default();
    let sink = events.clone();
    document.add_observer(move |event: &ChangeEvent| sink.borrow_mut().push(event.clone()));

    let result = document.change(|writer| {
        writer.set_selection(Selection::collapsed_at(pos(&[0, 3])))?;
        writer.insert(&pos(&[0, 0]), vec![Node::text("x")])?;
        writer.insert(&pos(&[5, 0]), vec![Node::text("y")])
    });

    assert!(result.is_err());
    assert!(events.borrow().is_empty(), "{:?}", events.borrow());
    assert_eq!(get_data(&document)?, "<paragraph>a[]bc</paragraph>");
    Ok(())
}

#[test]
fn test_selection_events_tell_direct_from_remapped() -> anyhow::Result<()> {
    let document = document(r#"<paragraph><$text bold="true">foo</$text>bar[]</paragraph>"#);
    let events: Rc<RefCell<Vec<ChangeEvent>>> = Rc::default();
    let sink = events.clone();
    document.add_observer(move |event: &ChangeEvent| {
        if !matches!(event, ChangeEvent::BatchApplied { .. }) {
            sink.borrow_mut().push(event.clone());
        }
    });

    document.selection().collapse(pos(&[0, 1]))?;
    assert_eq!(
        events.borrow_mut().drain(..).collect::<Vec<_>>(),
        vec![
            ChangeEvent::SelectionRangeChanged { direct: true },
            ChangeEvent::SelectionAttributesChanged {
                direct: false,
                keys: vec!["bold".to_string()]
            },
        ]
    );

    document.selection().set_attribute("italic", true)?;
    assert!(events.borrow_mut().drain(..).any(|event| event
        == ChangeEvent::SelectionAttributesChanged {
            direct: true,
            keys: vec!["italic".to_string()]
        }));

    document.change(|writer| writer.insert(&pos(&[0, 0]), vec![Node::text("x")]))?;
    assert_eq!(document.selection().focus(), Some(pos(&[0, 2])));
    let remapped = events.borrow_mut().drain(..).collect::<Vec<_>>();
    assert!(remapped.contains(&ChangeEvent::SelectionRangeChanged { direct: false }));
    assert!(!remapped.contains(&ChangeEvent::SelectionRangeChanged { direct: true }));
    Ok(())
}

#[test]
fn test_markers_follow_content() -> anyhow::Result<()> {
    let document = document("<paragraph>abcdef</paragraph>");
    let commented = Range::new(pos(&[0, 2]), pos(&[0, 4]));
    document.change(|writer| writer.add_marker("comment:1", commented, true))?;

    document.change(|writer| writer.insert(&pos(&[0, 0]), vec![Node::text("xy")]))?;
    {
        let model = document.model();
        let marker = model.get_marker("comment:1").expect("marker exists");
        assert_eq!(marker.range, Range::new(pos(&[0, 4]), pos(&[0, 6])));
        assert!(marker.affects_data);
    }

    let duplicate = document
        .change(|writer| writer.add_marker("comment:1", Range::collapsed(pos(&[0, 0])), false));
    assert!(duplicate.is_err());

    document.change(|writer| writer.remove_marker("comment:1"))?;
    assert!(document.model().get_marker("comment:1").is_none());

    document.undo()?;
    assert!(document.model().get_marker("comment:1").is_some());
    Ok(())
}

#[test]
fn test_stored_selection_attribute_cleared_on_typing() -> anyhow::Result<()> {
    let document = document("<paragraph>foo</paragraph><paragraph>[]</paragraph>");
    document.selection().set_attribute("bold", true)?;

    assert_eq!(document.selection().get_stored_attributes().get("bold"), Some(&json!(true)));
    assert_eq!(
        document.model().element_at("main", &[1])?.attributes.get("selection:bold"),
        Some(&json!(true))
    );

    document.change(|writer| {
        let attributes = writer.selection_attributes();
        writer.insert_text(&pos(&[1, 0]), "x", attributes)
    })?;

    let model = document.model();
    let paragraph = model.element_at("main", &[1])?;
    assert!(paragraph.attributes.get("selection:bold").is_none());
    assert_eq!(paragraph.children()[0].attributes().get("bold"), Some(&json!(true)));
    Ok(())
}

#[test]
fn test_operation_json_round_trip() -> anyhow::Result<()> {
    let operation = Operation::move_to(pos(&[0, 1]), 2, pos(&[1, 0]), 7);
    let value = serde_json::to_value(&operation)?;
    assert_eq!(value["type"], json!("move"));
    assert_eq!(value["baseVersion"], json!(7));
    assert_eq!(value["howMany"], json!(2));

    let parsed = Operation::from_json(&operation.to_json()?)?;
    assert_eq!(parsed, operation);

    let document = document("<paragraph>abc</paragraph><paragraph>x</paragraph>");
    let mut insert = Operation::from_json(concat!(
        r#"{"type":"insert","position":{"root":"main","path":[1,1]},"#,
        r#""nodes":[{"kind":"text","data":"yz"}],"baseVersion":0}"#,
    ))?;
    insert.set_base_version(document.version());
    document.apply_operation(insert)?;
    assert_eq!(
        stringify(&document.model(), "main", None)?,
        "<paragraph>abc</paragraph><paragraph>xyz</paragraph>"
    );
    Ok(())
}
