use clap::{arg, Command};
use log::warn;
use meshdrop::geometry::{load_obj, Aabb, ObjModel, ParseOptions, SplitMode};
use std::path::Path;
use std::time::Instant;

fn main() -> Result<(), Box<dyn std::error::Error>> {
    // Initialize logger
    env_logger::init();

    let matches = Command::new("obj_info")
        .version("1.0")
        .author("Meshdrop OBJ Info Tool")
        .about("Display object, batch and diagnostic information for OBJ files")
        .arg(arg!(<FILE> "OBJ file to analyze"))
        .arg(
            arg!(--"split-mode" <MODE> "How faces are grouped: none, object or material")
                .value_parser(clap::value_parser!(SplitMode))
                .required(false),
        )
        .arg(
            arg!(--"max-indices" <COUNT> "Maximum indices per batch")
                .value_parser(clap::value_parser!(usize))
                .required(false),
        )
        .arg(arg!(--batches "List every batch"))
        .get_matches();

    let file_path = matches
        .get_one::<String>("FILE")
        .ok_or("missing FILE argument")?;
    let list_batches = matches.get_flag("batches");

    let mut options = ParseOptions::default();
    if let Some(mode) = matches.get_one::<SplitMode>("split-mode") {
        options.split_mode = *mode;
    }
    if let Some(max) = matches.get_one::<usize>("max-indices") {
        options.max_indices_per_batch = *max;
    }

    let path = Path::new(file_path);
    if !path.exists() {
        eprintln!("Error: File '{}' does not exist", file_path);
        std::process::exit(1);
    }

    let start = Instant::now();
    let model = load_obj(path, options)?;
    let elapsed = start.elapsed();

    print_model(path, &model, list_batches);
    println!("\nParsed in {:.3}s", elapsed.as_secs_f64());

    Ok(())
}

fn print_model(path: &Path, model: &ObjModel, list_batches: bool) {
    let stats = &model.stats;

    println!("OBJ File Information:");
    println!("====================");
    println!("File: {}", path.display());
    println!("Lines: {} ({} bytes)", stats.lines, stats.bytes);
    println!("Positions: {}", stats.positions);
    println!("Normals: {}", stats.normals);
    println!("Texture coordinates: {}", stats.tex_coords);
    println!("Faces: {}", stats.faces);
    println!("Triangles: {}", stats.triangles);
    println!("Objects: {}", stats.objects);
    println!("Batches: {}", stats.batches);
    println!("Materials: {}", model.materials.len());

    let bounds = model
        .objects
        .iter()
        .fold(Aabb::empty(), |acc, object| acc.merge(&object.bounds()));
    if !bounds.is_empty() {
        print_bounds("Bounding Box", &bounds);
    }

    println!("\nObjects:");
    for object in &model.objects {
        println!(
            "  {}: {} batches, {} vertices, {} triangles, materials [{}]",
            object.name,
            object.batches.len(),
            object.vertex_count(),
            object.triangle_count(),
            object.materials().join(", ")
        );
        if list_batches {
            for (i, batch) in object.batches.iter().enumerate() {
                println!(
                    "    #{} {} part {}: {} vertices, {} indices",
                    i,
                    batch.material,
                    batch.partition,
                    batch.vertex_count(),
                    batch.indices.len()
                );
            }
        }
    }

    if !model.diagnostics.is_empty() {
        println!("\nDiagnostics: {}", model.diagnostics.total());
        for diagnostic in model.diagnostics.iter() {
            println!("  {}", diagnostic);
        }
        if model.diagnostics.dropped() > 0 {
            warn!("{} diagnostics not stored", model.diagnostics.dropped());
        }
    }
}

fn print_bounds(title: &str, bounds: &Aabb) {
    let size = bounds.size();
    println!("\n{}:", title);
    println!(
        "  Min: [{:.6}, {:.6}, {:.6}]",
        bounds.min.x, bounds.min.y, bounds.min.z
    );
    println!(
        "  Max: [{:.6}, {:.6}, {:.6}]",
        bounds.max.x, bounds.max.y, bounds.max.z
    );
    println!("  Size: [{:.6}, {:.6}, {:.6}]", size[0], size[1], size[2]);
}
