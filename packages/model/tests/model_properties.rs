//! End-to-end behaviour of positions, operations, the walker, the
//! selection and the composer

use folio_model::dev_utils::{get_data, set_data};
use folio_model::{
    Composer, DeleteOptions, Direction, Document, Element, Model, ModifyOptions, Node, Operation,
    Position, Range, StepKind, Stickiness, TreeWalker, Unit, WalkerOptions,
};
use serde_json::json;

fn pos(path: &[usize]) -> Position {
    Position::new("main", path.to_vec())
}

fn paragraph(text: &str) -> Node {
    Element::new("paragraph").with_children(vec![Node::text(text)]).into()
}

fn model_with(nodes: Vec<Node>) -> Model {
    let mut model = Model::new("main");
    Operation::insert(pos(&[0]), nodes, 0).apply(&mut model).unwrap();
    model
}

#[test]
fn test_unrelated_operations_leave_positions_alone() {
    let model = model_with(vec![paragraph("foo"), paragraph("bar")]);
    let position = pos(&[0, 1]);
    let version = model.version();

    let operations = vec![
        Operation::insert(pos(&[1, 2]), vec![Node::text("x")], version),
        Operation::remove(pos(&[1, 0]), 2, version),
        Operation::move_to(pos(&[1, 0]), 1, pos(&[1, 3]), version),
        Operation::insert(pos(&[0, 3]), vec![Node::text("!")], version),
    ];
    for operation in &operations {
        assert_eq!(operation.affects_position(&position), position, "{}", operation.kind());
    }
}

#[test]
fn test_insert_shift_matches_tracked_positions() {
    let document = Document::new();
    let quote = Element::new("quote").with_children(vec![paragraph("x")]);
    document
        .change(|writer| writer.insert(&pos(&[0]), vec![paragraph("abcdef"), quote.into()]))
        .unwrap();

    let watched = [pos(&[0, 2]), pos(&[0, 4]), pos(&[0, 6]), pos(&[1, 0, 1]), pos(&[0, 1])];
    let tracked: Vec<_> = watched
        .iter()
        .map(|position| document.track_position(position.clone()).unwrap())
        .collect();

    let insert = Operation::insert(pos(&[0, 2]), vec![Node::text("XY")], document.version());
    document.apply_operation(insert.clone()).unwrap();

    for (position, tracked) in watched.iter().zip(&tracked) {
        assert_eq!(tracked.position().unwrap(), insert.affects_position(position));
    }
    assert_eq!(tracked[0].position().unwrap(), pos(&[0, 4]));
    assert_eq!(tracked[2].position().unwrap(), pos(&[0, 8]));
    assert_eq!(tracked[3].position().unwrap(), pos(&[1, 0, 1]));
    assert_eq!(tracked[4].position().unwrap(), pos(&[0, 1]));

    // One level up: everything after the inserted element shifts at depth 0.
    let block = Operation::insert(pos(&[1]), vec![paragraph("new")], document.version());
    document.apply_operation(block.clone()).unwrap();
    assert_eq!(tracked[3].position().unwrap(), pos(&[2, 0, 1]));
    assert_eq!(tracked[3].position().unwrap(), block.affects_position(&pos(&[1, 0, 1])));
}

#[test]
fn test_reversal_restores_the_tree() {
    let document = Document::new();
    set_data(&document, r#"<paragraph>foo</paragraph><paragraph>bar</paragraph>"#).unwrap();
    let original = document.model().main_root().clone();

    let attribute_range = Range::new(pos(&[0, 0]), pos(&[0, 2]));
    let cases: Vec<Box<dyn Fn(u64) -> Operation>> = vec![
        Box::new(|version| Operation::insert(pos(&[0, 1]), vec![Node::text("xyz")], version)),
        Box::new(|version| Operation::remove(pos(&[1, 0]), 2, version)),
        Box::new(|version| Operation::move_to(pos(&[0]), 1, pos(&[2]), version)),
        Box::new(move |version| {
            Operation::Attribute(folio_model::AttributeOperation {
                range: attribute_range.clone(),
                key: "bold".into(),
                old_value: None,
                new_value: Some(json!(true)),
                base_version: version,
            })
        }),
        Box::new(|version| {
            Operation::Rename(folio_model::RenameOperation {
                position: pos(&[1]),
                old_name: "paragraph".into(),
                new_name: "heading".into(),
                base_version: version,
            })
        }),
    ];

    for make in cases {
        let version = document.version();
        let operation = make(version);
        document.apply_operation(operation.clone()).unwrap();
        assert_ne!(*document.model().main_root(), original);

        document.apply_operation(operation.get_reversed()).unwrap();
        assert_eq!(*document.model().main_root(), original);
        assert_eq!(document.version(), version + 2);
    }
}

#[test]
fn test_walker_round_trip() {
    let model = model_with(vec![
        Element::new("paragraph")
            .with_children(vec![Node::text("foo"), Node::element("image"), Node::text("bar")])
            .into(),
        paragraph("baz"),
    ]);
    let range = Range::new(pos(&[0, 1]), pos(&[1, 2]));
    let collect = |direction: Direction| -> Vec<String> {
        let walker = TreeWalker::new(
            &model,
            WalkerOptions {
                boundaries: Some(range.clone()),
                direction,
                ..Default::default()
            },
        )
        .unwrap();
        walker
            .filter(|value| value.kind == StepKind::Text)
            .filter_map(|value| value.item.as_text().map(|text| text.data().to_string()))
            .collect()
    };

    let forward = collect(Direction::Forward).concat();
    let mut backward = collect(Direction::Backward);
    backward.reverse();

    assert_eq!(forward, "oobarba");
    assert_eq!(backward.concat(), forward);
    assert_eq!(range.text(&model).unwrap(), forward);
}

#[test]
fn test_selection_infers_attributes_from_preceding_text() {
    let document = Document::new();
    set_data(&document, r#"<paragraph><$text bold="true">foo</$text>[]bar</paragraph>"#).unwrap();
    assert_eq!(document.selection().get_attribute("bold"), Some(json!(true)));

    let composer = Composer::new();
    composer
        .modify_document_selection(
            &document,
            &ModifyOptions {
                direction: Direction::Forward,
                unit: Unit::Character,
            },
        )
        .unwrap();
    assert_eq!(document.selection().focus(), Some(pos(&[0, 4])));
    assert_eq!(document.selection().get_attribute("bold"), None);

    document.selection().collapse(pos(&[0, 4])).unwrap();
    assert_eq!(document.selection().get_attribute("bold"), None);
}

#[test]
fn test_delete_collapses_at_deletion_point() {
    let document = Document::new();
    set_data(&document, "<paragraph>f[o]o</paragraph>").unwrap();

    Composer::new()
        .delete_selection(&document, &DeleteOptions::default())
        .unwrap();
    assert_eq!(get_data(&document).unwrap(), "<paragraph>f[]o</paragraph>");
    assert!(document.selection().is_collapsed());
}

#[test]
fn test_deleting_empty_selection_changes_nothing() {
    let document = Document::new();
    let markup = "<paragraph>foo</paragraph><paragraph>[]</paragraph><paragraph>bar</paragraph>";
    set_data(&document, markup).unwrap();
    let version = document.version();

    let composer = Composer::new();
    composer.delete_selection(&document, &DeleteOptions::default()).unwrap();
    composer.delete_selection(&document, &DeleteOptions::default()).unwrap();

    assert_eq!(get_data(&document).unwrap(), markup);
    assert_eq!(document.version(), version);
}

#[test]
fn test_move_within_container() {
    let document = Document::new();
    set_data(&document, "<paragraph>abcde</paragraph>").unwrap();
    let tracked = document.track_position(pos(&[0, 3])).unwrap();

    let operation = Operation::move_to(pos(&[0, 0]), 2, pos(&[0, 4]), document.version());
    document.apply_operation(operation.clone()).unwrap();

    assert_eq!(tracked.position().unwrap(), pos(&[0, 1]));
    assert_eq!(operation.affects_position(&pos(&[0, 3])), pos(&[0, 1]));
    assert_eq!(document.model().main_root().text_content(), "cdabe");
}

#[test]
fn test_stickiness_decides_insertion_side() {
    let insert = Operation::insert(pos(&[0, 2]), vec![Node::text("XY")], 0);
    let previous = pos(&[0, 2]).with_stickiness(Stickiness::ToPrevious);
    let next = pos(&[0, 2]).with_stickiness(Stickiness::ToNext);

    assert_eq!(insert.affects_position(&previous), pos(&[0, 2]));
    assert_eq!(insert.affects_position(&next), pos(&[0, 4]));
    assert_eq!(insert.affects_position(&pos(&[0, 2])), pos(&[0, 4]));
}
