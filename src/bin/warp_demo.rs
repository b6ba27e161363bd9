use food_depth::config::warp_demo::{load_config, WarpDemoConfig};
use food_depth::depth::DepthNormalizer;
use food_depth::image::io::{
    load_gray_image, load_rgb_image, save_depth_image, save_image_f32, write_json_file,
};
use food_depth::loss::{FrameTriplet, ObjectiveSample, ScaleReport, ViewSynthesisObjective};
use food_depth::DepthRange;
use log::info;
use serde::Serialize;
use std::env;
use std::path::Path;
use std::time::Instant;

fn main() {
    env_logger::init();
    if let Err(err) = run() {
        eprintln!("Error: {err}");
        std::process::exit(1);
    }
}

fn run() -> Result<(), String> {
    let config_path = env::args().nth(1).ok_or_else(usage)?;
    let config = load_config(Path::new(&config_path))?;
    let sample = load_sample(&config)?;
    let (w, h) = (sample.frames.width(), sample.frames.height());

    let camera = config.camera.build(w, h).map_err(|e| e.to_string())?;
    let normalizer = DepthNormalizer::new(config.depth).map_err(|e| e.to_string())?;
    let objective = ViewSynthesisObjective::new(camera, normalizer, config.loss);

    let start = Instant::now();
    let output = objective.evaluate(&sample).map_err(|e| e.to_string())?;
    let elapsed_ms = start.elapsed().as_secs_f64() * 1000.0;
    let finest = output
        .scales
        .first()
        .ok_or("Objective produced no scales")?;
    info!("objective total={:.6} in {elapsed_ms:.2} ms", output.total);

    let out = &config.output;
    save_image_f32(&finest.reprojection_prev, &out.reprojection_prev).map_err(|e| e.to_string())?;
    save_image_f32(&finest.reprojection_next, &out.reprojection_next).map_err(|e| e.to_string())?;
    save_depth_image(&finest.depth, config.depth.max_depth, &out.depth_image)
        .map_err(|e| e.to_string())?;

    let report = WarpDemoReport {
        width: w,
        height: h,
        depth_range: config.depth,
        total: output.total,
        elapsed_ms,
        scales: output.reports(),
    };
    write_json_file(&out.report_json, &report).map_err(|e| e.to_string())?;

    println!(
        "Saved reprojections to {} and {}",
        out.reprojection_prev.display(),
        out.reprojection_next.display()
    );
    println!(
        "Objective {:.6} over {} scale(s); report written to {}",
        report.total,
        report.scales.len(),
        out.report_json.display()
    );
    Ok(())
}

fn load_sample(config: &WarpDemoConfig) -> Result<ObjectiveSample, String> {
    let prev = load_rgb_image(&config.frames.prev).map_err(|e| e.to_string())?;
    let curr = load_rgb_image(&config.frames.curr).map_err(|e| e.to_string())?;
    let next = load_rgb_image(&config.frames.next).map_err(|e| e.to_string())?;
    let frames = FrameTriplet::new(prev, curr, next).map_err(|e| e.to_string())?;
    let disparity = load_gray_image(&config.disparity).map_err(|e| e.to_string())?;
    Ok(ObjectiveSample {
        frames,
        disparities: vec![disparity],
        pose_prev: config.pose_prev,
        pose_next: config.pose_next,
    })
}

fn usage() -> String {
    "Usage: warp_demo <config.json>".to_string()
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct WarpDemoReport {
    width: usize,
    height: usize,
    depth_range: DepthRange,
    total: f32,
    elapsed_ms: f64,
    scales: Vec<ScaleReport>,
}
