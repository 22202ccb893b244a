mod manifest;
mod metrics;
mod predictor;
mod visualize;

use anyhow::{bail, Context, Result};
use clap::{Parser, Subcommand, ValueEnum};
use image::RgbImage;
use manifest::DatasetParser;
use predictor::{ProcessPredictor, Prompt};
use std::fs;
use std::path::{Path, PathBuf};
use visualize::{FrameOptions, TextPainter};

#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
struct Args {
    /// Enable debug logging
    #[arg(long, global = true)]
    debug: bool,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Build a JSON manifest of image, mask and prompt triples
    Manifest {
        /// Dataset layout to scan
        #[arg(value_enum)]
        dataset: Dataset,

        /// Folder holding the dataset folders; manifests are written here
        #[arg(long, default_value = "datasets")]
        data_dir: PathBuf,
    },

    /// Intersection over union of a predicted and a ground-truth mask image
    Iou {
        #[arg(long)]
        pred: PathBuf,

        #[arg(long)]
        gt: PathBuf,
    },

    /// Read normalized box labels (`class x_c y_c w h`) as xywh prompts
    Boxes {
        /// Folder of `.txt` label files
        #[arg(long)]
        labels: PathBuf,

        /// Print the boxes as JSON instead of a summary
        #[arg(long)]
        json: bool,
    },

    /// Blend mask images over an image
    Overlay {
        #[arg(long)]
        image: PathBuf,

        /// Mask image; repeat for several objects
        #[arg(long = "mask", required = true)]
        masks: Vec<PathBuf>,

        /// Blending coefficient of the colored masks
        #[arg(long, default_value_t = 0.3)]
        alpha: f32,

        #[arg(short, long)]
        output: PathBuf,

        /// Also write the union of the masks as a black and white image
        #[arg(long)]
        mask_out: Option<PathBuf>,

        /// Also write the colored masks on black, before blending
        #[arg(long)]
        color_out: Option<PathBuf>,
    },

    /// Segment a video through a predictor server and render the results
    Propagate {
        /// Predictor server executable speaking JSON lines on stdin/stdout
        #[arg(long)]
        server: String,

        /// Argument passed to the predictor server; repeatable
        #[arg(long = "server-arg", allow_hyphen_values = true)]
        server_args: Vec<String>,

        /// Frame folder (`0001.jpg`, ...) or video file
        #[arg(long)]
        resource: PathBuf,

        /// Text prompt
        #[arg(long)]
        text: Option<String>,

        /// Label file whose boxes are used as positive box prompts
        #[arg(long)]
        boxes: Option<PathBuf>,

        /// Frame the prompt applies to
        #[arg(long, default_value_t = 0)]
        prompt_frame: usize,

        /// Folder for the rendered frames
        #[arg(short, long)]
        output: PathBuf,

        /// Draw prompt boxes on frames near the prompt frame
        #[arg(long)]
        draw_on_video: bool,

        #[arg(long, default_value_t = 5)]
        n_frames_to_draw: usize,

        #[arg(long, default_value_t = 200)]
        max_objects: usize,

        /// Font used to caption frames with the prompt
        #[arg(long)]
        font: Option<PathBuf>,

        #[arg(long, default_value_t = 90.0)]
        font_size: f32,
    },

    /// Caption a frame with a prompt
    PromptCard {
        #[arg(long)]
        frame: PathBuf,

        /// Text prompt; without it the frame is captioned as a box prompt
        #[arg(long)]
        text: Option<String>,

        #[arg(long)]
        font: PathBuf,

        #[arg(long, default_value_t = 90.0)]
        font_size: f32,

        #[arg(short, long)]
        output: PathBuf,
    },
}

#[derive(ValueEnum, Clone, Copy, Debug, PartialEq, Eq)]
enum Dataset {
    Big,
    #[value(name = "dis5k")]
    Dis5k,
    #[value(name = "thin5k")]
    Thin5k,
    All,
}

fn main() -> Result<()> {
    let args = Args::parse();

    // Initialize logging
    let log_level = if args.debug {
        tracing::Level::DEBUG
    } else {
        tracing::Level::INFO
    };

    tracing_subscriber::fmt()
        .with_max_level(log_level)
        .with_target(false)
        .init();

    match args.command {
        Command::Manifest { dataset, data_dir } => run_manifest(dataset, &data_dir),
        Command::Iou { pred, gt } => run_iou(&pred, &gt),
        Command::Boxes { labels, json } => run_boxes(&labels, json),
        Command::Overlay {
            image,
            masks,
            alpha,
            output,
            mask_out,
            color_out,
        } => run_overlay(
            &image,
            &masks,
            alpha,
            &output,
            mask_out.as_deref(),
            color_out.as_deref(),
        ),
        Command::Propagate {
            server,
            server_args,
            resource,
            text,
            boxes,
            prompt_frame,
            output,
            draw_on_video,
            n_frames_to_draw,
            max_objects,
            font,
            font_size,
        } => {
            let prompt = build_prompt(text, boxes.as_deref())?;
            let painter = font
                .map(|path| TextPainter::from_file(&path, font_size))
                .transpose()?;
            let options = FrameOptions {
                n_frames_to_draw,
                draw_on_video,
                max_objects,
                ..Default::default()
            };
            run_propagate(
                &server,
                &server_args,
                &resource,
                &prompt,
                prompt_frame,
                &output,
                &options,
                painter.as_ref(),
            )
        }
        Command::PromptCard {
            frame,
            text,
            font,
            font_size,
            output,
        } => {
            let painter = TextPainter::from_file(&font, font_size)?;
            let prompt = text.map(Prompt::text).unwrap_or_default();
            let img = open_rgb(&frame)?;
            save(&visualize::put_prompt_on_frame(&prompt, &img, &painter), &output)
        }
    }
}

fn run_manifest(dataset: Dataset, data_dir: &Path) -> Result<()> {
    let parsers: Vec<Box<dyn DatasetParser>> = match dataset {
        Dataset::Big => vec![Box::new(manifest::BigParser)],
        Dataset::Dis5k => vec![Box::new(manifest::Dis5kParser)],
        Dataset::Thin5k => vec![Box::new(manifest::Thin5kParser)],
        Dataset::All => manifest::all_parsers(),
    };

    for parser in &parsers {
        manifest::build_manifest(parser.as_ref(), data_dir)?;
    }
    Ok(())
}

fn run_iou(pred: &Path, gt: &Path) -> Result<()> {
    let pred_mask = metrics::load_mask(pred)?;
    let gt_mask = metrics::load_mask(gt)?;
    let iou = metrics::calc_iou(&pred_mask, &gt_mask)?;
    println!("{iou:.6}");
    Ok(())
}

fn run_boxes(labels: &Path, json: bool) -> Result<()> {
    let prompts = metrics::get_bbox_prompts(labels)?;
    if json {
        println!("{}", serde_json::to_string_pretty(&prompts)?);
    } else {
        for (name, boxes) in &prompts {
            println!("{name}: {} boxes", boxes.len());
        }
    }
    Ok(())
}

fn run_overlay(
    image: &Path,
    mask_paths: &[PathBuf],
    alpha: f32,
    output: &Path,
    mask_out: Option<&Path>,
    color_out: Option<&Path>,
) -> Result<()> {
    let img = open_rgb(image)?;
    let masks = mask_paths
        .iter()
        .map(|p| metrics::load_mask(p))
        .collect::<Result<Vec<_>>>()?;
    let mask_refs: Vec<_> = masks.iter().collect();

    let overlay = visualize::visualize(&img, &mask_refs, alpha, &[])?;
    if let Some(path) = mask_out {
        metrics::mask_to_image(&overlay.bitmap)
            .save(path)
            .with_context(|| format!("Failed to write {}", path.display()))?;
    }
    if let Some(path) = color_out {
        save(&overlay.color_layer, path)?;
    }
    save(&overlay.blended, output)
}

fn build_prompt(text: Option<String>, boxes: Option<&Path>) -> Result<Prompt> {
    let mut prompt = match boxes {
        Some(path) => {
            let boxes = metrics::read_box_file(path)?;
            if boxes.is_empty() {
                bail!("No boxes in {}", path.display());
            }
            Prompt::positive_boxes(boxes)
        }
        None => Prompt::default(),
    };
    prompt.text = text;

    if prompt.text.is_none() && prompt.boxes.is_none() {
        bail!("Give a --text prompt, a --boxes label file, or both");
    }
    Ok(prompt)
}

#[allow(clippy::too_many_arguments)]
fn run_propagate(
    server: &str,
    server_args: &[String],
    resource: &Path,
    prompt: &Prompt,
    prompt_frame: usize,
    output: &Path,
    options: &FrameOptions,
    painter: Option<&TextPainter>,
) -> Result<()> {
    let resource_str = resource
        .to_str()
        .with_context(|| format!("Resource path is not UTF-8: {}", resource.display()))?;

    let outputs = {
        let mut predictor = ProcessPredictor::spawn(server, server_args)?;
        predictor::segment_on_video(&mut predictor, resource_str, prompt, prompt_frame)
            .context("Video segmentation failed")?
    };
    tracing::info!("Predictor returned {} frames", outputs.len());

    if !resource.is_dir() {
        tracing::warn!("{} is not a frame folder, nothing to render", resource.display());
        return Ok(());
    }

    fs::create_dir_all(output)
        .with_context(|| format!("Failed to create {}", output.display()))?;

    let rendered =
        visualize::visualize_on_frames(resource, &outputs, prompt, prompt_frame, options)?;

    if let Some(prompt_img) = &rendered.prompt_image {
        save(prompt_img, &output.join("prompt.png"))?;
    }
    for (index, frame) in &rendered.frames {
        let frame = match painter {
            Some(painter) => visualize::put_prompt_on_frame(prompt, frame, painter),
            None => frame.clone(),
        };
        save(&frame, &output.join(format!("frame_{index:05}.png")))?;
    }

    tracing::info!("Wrote {} frames to {}", rendered.frames.len(), output.display());
    Ok(())
}

fn open_rgb(path: &Path) -> Result<RgbImage> {
    Ok(image::open(path)
        .with_context(|| format!("Failed to open image {}", path.display()))?
        .to_rgb8())
}

fn save(img: &RgbImage, path: &Path) -> Result<()> {
    img.save(path)
        .with_context(|| format!("Failed to write {}", path.display()))
}
