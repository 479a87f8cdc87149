use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing::{info, warn};

use logo_api::{AdmissionPipeline, AppState};
use logo_eval::corpus::{corpus_entries, evaluate_entries, list_images};
use logo_eval::report::{render_report, write_report};
use logo_eval::{EvaluationAggregator, MatchOrder};
use logo_fetch::{yadisk, Fetcher};
use logo_vision::weights::{ensure_weights, WeightsError};
use logo_vision::DetectionAdapter;

mod settings;

use settings::Settings;

#[derive(Debug, Parser)]
#[command(name = "logo", version, about = "Single-class logo detection service and evaluator")]
struct Cli {
    /// Optional TOML settings file; environment variables override it.
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    #[command(subcommand)]
    cmd: Command,
}

#[derive(Debug, Subcommand)]
enum Command {
    /// Serve `/detect` and `/health`.
    Serve,
    /// Score the detector against a YOLO-labelled image folder.
    Evaluate {
        #[arg(long, default_value = "dataset/val/images")]
        images_dir: PathBuf,
        #[arg(long, default_value = "dataset/val/labels")]
        labels_dir: PathBuf,
        #[arg(long, default_value_t = 0.5)]
        iou: f64,
        #[arg(long, default_value = "validation_metrics.json")]
        output: PathBuf,
        /// `as-given` or `confidence`.
        #[arg(long, default_value = "as-given")]
        match_order: MatchOrder,
    },
    /// Draw predicted boxes onto copies of the images.
    Visualize {
        #[arg(long)]
        images: PathBuf,
        #[arg(long)]
        out: PathBuf,
        /// 0 = all
        #[arg(long, default_value_t = 0)]
        max: usize,
    },
    /// Make sure the weights file is present, downloading it if needed.
    FetchWeights,
    /// Mirror a public Yandex Disk folder or file.
    FetchDataset {
        #[arg(long)]
        public_link: String,
        #[arg(long, default_value = "")]
        remote_path: String,
        #[arg(long)]
        dest: PathBuf,
    },
    /// Print model tensor shapes.
    Inspect,
    Doctor,
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    let settings = Settings::load(cli.config.as_deref())?;

    let filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .or_else(|_| tracing_subscriber::EnvFilter::try_new(&settings.log_level))
        .context("log filter")?;
    tracing_subscriber::fmt().with_env_filter(filter).init();

    match cli.cmd {
        Command::Serve => serve(&settings).await?,
        Command::Evaluate { images_dir, labels_dir, iou, output, match_order } => {
            evaluate(&settings, images_dir, labels_dir, iou, output, match_order).await?
        }
        Command::Visualize { images, out, max } => visualize(&settings, images, out, max).await?,
        Command::FetchWeights => {
            let path = ensure_weights(&settings.weights_source()).await?;
            println!("{}", path.display());
        }
        Command::FetchDataset { public_link, remote_path, dest } => {
            let fetcher = Fetcher::new(settings.weights_cert_sha256.as_deref())?;
            let n = yadisk::download_public(&fetcher, &public_link, &remote_path, &dest).await?;
            info!("fetch-dataset: {} file(s) written under {}", n, dest.display());
        }
        Command::Inspect => inspect(&settings).await?,
        Command::Doctor => doctor(&settings)?,
    }
    Ok(())
}

async fn load_adapter(settings: &Settings) -> Result<Arc<DetectionAdapter>> {
    let weights = match ensure_weights(&settings.weights_source()).await {
        Ok(p) => p,
        Err(e @ WeightsError::Missing(_)) => {
            return Err(anyhow::Error::new(e).context("set WEIGHTS_PATH to an existing file or WEIGHTS_URL to download one"))
        }
        Err(e) => return Err(e.into()),
    };
    let adapter = DetectionAdapter::load(&settings.vision_config(), &weights)?;
    Ok(Arc::new(adapter))
}

async fn serve(settings: &Settings) -> Result<()> {
    let addr = settings.bind_addr()?;
    let adapter = load_adapter(settings).await?;

    if settings.warmup {
        let a = adapter.clone();
        match tokio::task::spawn_blocking(move || a.warmup()).await {
            Ok(Ok(n)) => info!("serve: warmup done ({} boxes)", n),
            Ok(Err(e)) => warn!("serve: warmup failed, continuing: {}", e),
            Err(e) => warn!("serve: warmup task failed, continuing: {}", e),
        }
    }

    let limits = settings.admission_limits();
    info!(
        "serve: max_concurrency={} timeout={:?} max_bytes={} max_pixels={}",
        limits.max_concurrency, limits.request_timeout, limits.max_file_bytes, limits.max_image_pixels
    );
    let pipeline = Arc::new(AdmissionPipeline::new(adapter, limits));
    logo_api::serve(addr, AppState { pipeline }).await
}

async fn evaluate(
    settings: &Settings,
    images_dir: PathBuf,
    labels_dir: PathBuf,
    iou: f64,
    output: PathBuf,
    order: MatchOrder,
) -> Result<()> {
    anyhow::ensure!((0.0..=1.0).contains(&iou), "--iou must be in [0, 1]");
    let entries = corpus_entries(&images_dir, &labels_dir)?;
    info!("evaluate: {} image(s) in {}", entries.len(), images_dir.display());
    let adapter = load_adapter(settings).await?;

    let report = tokio::task::spawn_blocking(move || -> Result<_> {
        let mut agg = EvaluationAggregator::new(iou).with_order(order);
        evaluate_entries(&entries, &mut agg, |img| Ok(adapter.predict(img)?))?;
        Ok(agg.finish())
    })
    .await
    .context("evaluation task")??;

    write_report(&output, &report)?;
    info!("evaluate: report written to {}", output.display());
    println!("{}", render_report(&report)?);
    Ok(())
}

async fn visualize(settings: &Settings, images: PathBuf, out: PathBuf, max: usize) -> Result<()> {
    let mut paths = list_images(&images)?;
    if max > 0 {
        paths.truncate(max);
    }
    std::fs::create_dir_all(&out).with_context(|| format!("create {}", out.display()))?;
    let adapter = load_adapter(settings).await?;

    let written = tokio::task::spawn_blocking(move || -> Result<usize> {
        let mut written = 0;
        for p in &paths {
            let img = match image::open(p) {
                Ok(i) => i,
                Err(e) => {
                    warn!("visualize: skipping {}: {}", p.display(), e);
                    continue;
                }
            };
            let mut rgb = img.to_rgb8();
            let dets = adapter.predict_rgb_until(&rgb, None)?;
            logo_vision::draw::draw_detections(&mut rgb, &dets);
            let dst = out.join(p.file_name().context("image path has no file name")?);
            rgb.save(&dst).with_context(|| format!("save {}", dst.display()))?;
            written += 1;
        }
        Ok(written)
    })
    .await
    .context("visualize task")??;

    info!("visualize: {} image(s) written", written);
    Ok(())
}

#[cfg(feature = "vision-tflite")]
async fn inspect(settings: &Settings) -> Result<()> {
    let weights = ensure_weights(&settings.weights_source()).await?;
    let cfg = settings.vision_config();
    let use_gpu = cfg.device.resolve(cfg!(feature = "vision-gpu"))? != "cpu";
    let mut det = logo_vision::tflite::TfliteDetector::new(cfg, &weights, use_gpu)?;
    print!("{}", det.inspect()?);
    Ok(())
}

#[cfg(not(feature = "vision-tflite"))]
async fn inspect(_settings: &Settings) -> Result<()> {
    anyhow::bail!("vision backend not available; build with --features vision-tflite")
}

fn doctor(settings: &Settings) -> Result<()> {
    info!("doctor: starting");
    settings.validate()?;
    check_weights(&settings.weights_path, settings.weights_url.is_some())?;
    let device = settings.device.resolve(cfg!(feature = "vision-gpu"))?;
    info!("doctor: device={} backend={}", device, if cfg!(feature = "vision-tflite") { "tflite" } else { "none" });
    if !cfg!(feature = "vision-tflite") {
        warn!("doctor: no inference backend compiled in; serve/evaluate will fail");
    }
    info!("doctor: OK");
    Ok(())
}

fn check_weights(path: &Path, have_url: bool) -> Result<()> {
    if path.is_file() {
        let len = std::fs::metadata(path)?.len();
        anyhow::ensure!(len > 0, "weights file is empty: {}", path.display());
        info!("doctor: weights {} ({} bytes)", path.display(), len);
    } else if have_url {
        warn!("doctor: weights missing at {}; will download from WEIGHTS_URL", path.display());
    } else {
        anyhow::bail!("weights missing at {} and WEIGHTS_URL is not set", path.display());
    }
    Ok(())
}
