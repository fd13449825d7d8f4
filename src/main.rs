use std::path::PathBuf;

use anyhow::Result;
use candle::{D, IndexOp, Tensor};
use candle_nn::Linear;
use clap::{Parser, Subcommand};
use tracing::{Level, info};
use tracing_subscriber::FmtSubscriber;

use transducer_joiner::{
    Joiner, Projection, ScaledLinear,
    common::tensor_ext::TensorExt,
    config::{SETTINGS_FILE, Settings},
    loader::JoinerLoader,
};

/// Transducer joiner: combine encoder and decoder frames into logits
#[derive(Parser, Debug)]
#[command(name = "joiner", version, about)]
struct Cli {
    /// Settings file
    #[arg(short, long, global = true, default_value = SETTINGS_FILE)]
    config: PathBuf,

    /// Enable debug logging
    #[arg(short, long, global = true)]
    verbose: bool,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Show the resolved configuration
    Info,

    /// Run the joiner on random encoder/decoder frames
    Run {
        #[arg(short = 'n', long, default_value = "1")]
        batch: usize,

        #[arg(short = 't', long, default_value = "8")]
        frames: usize,

        /// Decoder context range (s_range)
        #[arg(short = 's', long, default_value = "5")]
        context: usize,

        /// Fold the learned scales into plain linear layers first
        #[arg(long)]
        fold: bool,
    },

    /// Initialise fresh weights and point the settings file at them
    Init {
        #[arg(short, long, default_value = "joiner.safetensors")]
        output: PathBuf,
    },
}

fn setup_logging(verbose: bool) {
    let level = if verbose { Level::DEBUG } else { Level::INFO };
    let subscriber = FmtSubscriber::builder()
        .with_max_level(level)
        .with_target(false)
        .compact()
        .finish();
    if let Err(e) = tracing::subscriber::set_global_default(subscriber) {
        eprintln!("{e:?}");
    }
}

fn run<P: Projection>(
    joiner: &Joiner<P>,
    loader: &JoinerLoader,
    (batch, frames, context): (usize, usize, usize),
) -> Result<()> {
    let cfg = joiner.config();
    let device = loader.device();
    let randn = |dim: usize| {
        Tensor::randn(0f32, 1.0, (batch, frames, context, dim), device)?.to_dtype(loader.dtype())
    };
    let encoder_out = randn(cfg.encoder_dim)?;
    let decoder_out = randn(cfg.decoder_dim)?;

    let logits = joiner.forward(&encoder_out, &decoder_out)?;
    let mean = logits.float()?.mean_all()?.to_scalar::<f32>()?;
    info!(shape = ?logits.dims(), mean, "logits");

    let probs = logits.i((0, 0, 0))?.float()?.softmax(D::Minus1)?;
    let token = probs.argmax(D::Minus1)?.to_scalar::<u32>()?;
    let prob = probs.i(token as usize)?.to_scalar::<f32>()?;
    info!(token, prob, "top token at (0, 0, 0)");

    Ok(())
}

fn main() -> Result<()> {
    let cli = Cli::parse();
    setup_logging(cli.verbose);

    let mut settings = Settings::load(&cli.config);

    match cli.command {
        Command::Info => {
            let loader = JoinerLoader::new(&settings)?;
            let cfg = loader.config();
            println!("config:     {}", cli.config.display());
            println!("encoder:    {}", cfg.encoder_dim);
            println!("decoder:    {}", cfg.decoder_dim);
            println!("joiner:     {}", cfg.joiner_dim);
            println!("vocab:      {}", cfg.vocab_size);
            println!("parameters: {}", cfg.num_parameters(!settings.folded));
            println!("device:     {:?}", loader.device());
            println!("dtype:      {:?}", loader.dtype());
            match loader.weights() {
                Some(path) => println!("weights:    {}", path.display()),
                None => println!("weights:    fresh"),
            }
        }
        Command::Run {
            batch,
            frames,
            context,
            fold,
        } => {
            let loader = JoinerLoader::new(&settings)?;
            let dims = (batch, frames, context);
            if settings.folded {
                run(&loader.build::<Linear>()?, &loader, dims)?;
            } else {
                let joiner = loader.build::<ScaledLinear>()?;
                if fold {
                    run(&joiner.fold()?, &loader, dims)?;
                } else {
                    run(&joiner, &loader, dims)?;
                }
            }
        }
        Command::Init { output } => {
            settings.weights = None;
            settings.repo = None;
            let loader = JoinerLoader::new(&settings)?;
            if settings.folded {
                loader.build::<Linear>()?;
            } else {
                loader.build::<ScaledLinear>()?;
            }
            loader.save(&output)?;

            settings.weights = Some(output.display().to_string());
            settings.save(&cli.config)?;
            info!(config = ?cli.config, "settings written");
        }
    }

    Ok(())
}
