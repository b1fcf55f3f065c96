use criterion::{black_box, criterion_group, criterion_main, Criterion};
use folio_model::{
    transform, Direction, Document, Element, Model, Node, Operation, Position, Range,
    TransformContext, TreeWalker, WalkerOptions,
};

fn paragraphs(count: usize) -> Vec<Node> {
    (0..count)
        .map(|index| {
            Element::new("paragraph")
                .with_children(vec![Node::text(format!(
                    "Paragraph number {} with some text",
                    index
                ))])
                .into()
        })
        .collect()
}

fn model_with(count: usize) -> Model {
    let mut model = Model::new("main");
    Operation::insert(Position::new("main", vec![0]), paragraphs(count), 0)
        .apply(&mut model)
        .unwrap();
    model
}

fn walk_document(c: &mut Criterion) {
    let model = model_with(200);

    c.bench_function("walk_forward_200_paragraphs", |b| {
        b.iter(|| {
            let walker = TreeWalker::new(black_box(&model), WalkerOptions::default()).unwrap();
            walker.count()
        })
    });

    c.bench_function("walk_backward_single_characters", |b| {
        let range = Range::new(
            Position::new("main", vec![0, 0]),
            Position::new("main", vec![20, 0]),
        );
        b.iter(|| {
            let walker = TreeWalker::new(
                black_box(&model),
                WalkerOptions {
                    boundaries: Some(range.clone()),
                    direction: Direction::Backward,
                    single_characters: true,
                    ..Default::default()
                },
            )
            .unwrap();
            walker.count()
        })
    });
}

fn apply_typing(c: &mut Criterion) {
    c.bench_function("apply_100_single_char_inserts", |b| {
        b.iter(|| {
            let document = Document::new();
            document
                .change(|writer| writer.insert(&Position::new("main", vec![0]), paragraphs(10)))
                .unwrap();
            let tracked = document.track_position(Position::new("main", vec![5, 3])).unwrap();
            for offset in 0..100 {
                let position = Position::new("main", vec![0, offset]);
                document
                    .change(|writer| writer.insert(&position, vec![Node::text("x")]))
                    .unwrap();
            }
            tracked.position().unwrap()
        })
    });
}

fn transform_operations(c: &mut Criterion) {
    let insert = Operation::insert(Position::new("main", vec![3, 4]), vec![Node::text("abc")], 0);
    let remove = Operation::remove(Position::new("main", vec![3, 0]), 6, 0);
    let relocate = Operation::move_to(
        Position::new("main", vec![1]),
        2,
        Position::new("main", vec![5]),
        0,
    );

    c.bench_function("transform_insert_over_remove", |b| {
        b.iter(|| transform(black_box(&insert), black_box(&remove), TransformContext::default()))
    });

    c.bench_function("transform_remove_over_move", |b| {
        b.iter(|| transform(black_box(&remove), black_box(&relocate), TransformContext::default()))
    });
}

criterion_group!(benches, walk_document, apply_typing, transform_operations);
criterion_main!(benches);
