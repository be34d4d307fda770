use meshdrop::geometry::{
    load_obj, Diagnostic, ObjModel, ObjPipeline, ParseOptions, SplitMode, Step,
};
use std::fmt::Write as _;
use std::io::Cursor;

fn parse(source: &str, options: ParseOptions) -> ObjModel {
    ObjPipeline::new(Cursor::new(source.as_bytes().to_vec()), options)
        .run()
        .unwrap()
}

/// A flat polygon with `k` corners around the origin
fn polygon(k: usize) -> String {
    let mut source = String::new();
    for i in 0..k {
        let angle = i as f32 / k as f32 * std::f32::consts::TAU;
        writeln!(source, "v {} {} 0", angle.cos(), angle.sin()).unwrap();
    }
    source.push('f');
    for i in 1..=k {
        write!(source, " {i}").unwrap();
    }
    source.push('\n');
    source
}

#[test]
fn test_polygon_yields_k_minus_two_triangles() {
    for k in 3..=9 {
        let model = parse(&polygon(k), ParseOptions::default());
        assert_eq!(model.stats.triangles, k - 2, "{k}-gon");
        assert_eq!(model.objects[0].batches[0].vertex_count(), k);
    }
}

#[test]
fn test_batch_count_follows_index_limit() {
    // One quad per row: 2 triangles, 6 indices
    let mut source = String::new();
    let quads = 50;
    for q in 0..quads {
        let base = q * 4;
        for (x, y) in [(0, 0), (1, 0), (1, 1), (0, 1)] {
            writeln!(source, "v {} {} {}", x, y, q).unwrap();
        }
        writeln!(
            source,
            "f {} {} {} {}",
            base + 1,
            base + 2,
            base + 3,
            base + 4
        )
        .unwrap();
    }

    for limit in [3, 6, 30, 64, 300, 65535] {
        let options = ParseOptions {
            max_indices_per_batch: limit,
            ..ParseOptions::default()
        };
        let model = parse(&source, options);
        let triangles: usize = quads * 2;
        let per_batch = (limit / 3).max(1);

        let batches = &model.objects[0].batches;
        assert_eq!(batches.len(), triangles.div_ceil(per_batch), "limit {limit}");
        for batch in batches {
            assert!(batch.indices.len() <= limit);
            assert_eq!(batch.indices.len() % 3, 0);
            assert!(batch
                .indices
                .iter()
                .all(|&i| (i as usize) < batch.vertex_count()));
        }
        assert_eq!(model.stats.triangles, triangles);
    }
}

#[test]
fn test_negative_one_is_latest_position() {
    let source = "v 0 0 0\nv 1 0 0\nv 0 1 0\nf -3 -2 -1\nv 5 5 5\nf 1 2 -1\n";
    let model = parse(source, ParseOptions::default());

    assert!(model.diagnostics.is_empty());
    let batch = &model.objects[0].batches[0];
    assert!(batch.positions.contains(&[0.0, 1.0, 0.0]));
    assert!(batch.positions.contains(&[5.0, 5.0, 5.0]));
    assert_eq!(batch.triangle_count(), 2);
}

#[test]
fn test_garbage_lines_do_not_stop_parsing() {
    let source = "\
v 0 0 0
v 1 0 0
vt 0.5
v 0 1 0
f 1 2 x
s off
f 1 2 3
";
    let model = parse(source, ParseOptions::default());

    assert_eq!(model.stats.triangles, 1);
    let lines: Vec<u64> = model.diagnostics.iter().map(Diagnostic::line).collect();
    assert_eq!(lines, vec![3, 5]);
}

#[test]
fn test_split_mode_none_merges_objects() {
    let source = "v 0 0 0\nv 1 0 0\nv 0 1 0\no a\nf 1 2 3\no b\nf 3 2 1\n";

    let split = parse(source, ParseOptions::default());
    assert_eq!(split.objects.len(), 2);

    let merged = parse(
        source,
        ParseOptions {
            split_mode: SplitMode::None,
            ..ParseOptions::default()
        },
    );
    assert_eq!(merged.objects.len(), 1);
    assert_eq!(merged.objects[0].triangle_count(), 2);
}

#[test]
fn test_load_from_disk_with_materials() {
    let dir = tempfile::tempdir().unwrap();
    std::fs::write(
        dir.path().join("scene.mtl"),
        "newmtl red\nKd 1 0 0\nnewmtl blue\nKd 0 0 1\nd 0.5\n",
    )
    .unwrap();
    std::fs::write(
        dir.path().join("scene.obj"),
        "mtllib scene.mtl\nv 0 0 0\nv 1 0 0\nv 0 1 0\nv 1 1 0\n\
         usemtl red\nf 1 2 3\nusemtl blue\nf 2 4 3\n",
    )
    .unwrap();

    let model = load_obj(&dir.path().join("scene.obj"), ParseOptions::default()).unwrap();

    assert!(model.diagnostics.is_empty());
    assert_eq!(model.materials.len(), 2);
    assert_eq!(model.materials.get("blue").opacity, 0.5);
    assert_eq!(model.objects[0].materials(), vec!["red", "blue"]);
}

#[test]
fn test_stepping_matches_single_run() {
    let source = polygon(12);
    let options = ParseOptions {
        lines_per_step: 1,
        ..ParseOptions::default()
    };

    let mut pipeline = ObjPipeline::new(Cursor::new(source.as_bytes().to_vec()), options.clone());
    let mut objects = Vec::new();
    while pipeline.step().unwrap() == Step::Continue {
        objects.extend(std::iter::from_fn(|| pipeline.next_object()));
    }
    objects.extend(std::iter::from_fn(|| pipeline.next_object()));

    let whole = parse(&source, options);
    assert_eq!(objects.len(), whole.objects.len());
    assert_eq!(objects[0].triangle_count(), whole.objects[0].triangle_count());
    assert_eq!(pipeline.stats(), &whole.stats);
}
