#![forbid(unsafe_code)]

use std::path::PathBuf;

use anyhow::{bail, Context};
use clap::Parser;
use opfix::{
    generate, select_classes, DirCorpus, Encoder, GenConfig, OpcodeIndex, SkipPolicy, SkipRule,
    Variant,
};

#[derive(Parser, Debug)]
#[command(
    name = "opfix-gen",
    about = "Encode single-step CPU test corpora into binary conformance fixtures.",
    after_help = "Defaults come from OPFIX_CORPUS_DIR, OPFIX_OUT_DIR, OPFIX_METADATA, OPFIX_VARIANT \
                  and OPFIX_SKIP; flags override them. Set RUST_LOG=debug to see excluded classes."
)]
struct Args {
    /// Only generate these opcodes (hex, e.g. `40 FE`). Defaults to every opcode in the metadata.
    #[arg(value_name = "OPCODE", value_parser = parse_opcode)]
    opcodes: Vec<u8>,

    /// CPU variant whose skip policy applies (8088 or v20)
    #[arg(long)]
    variant: Option<Variant>,

    /// Directory holding `XX.json.gz` / `XX.N.json.gz` corpus files
    #[arg(long, value_name = "DIR")]
    corpus_dir: Option<PathBuf>,

    /// Directory the `.bin` fixtures are written to
    #[arg(long, value_name = "DIR")]
    out_dir: Option<PathBuf>,

    /// Opcode metadata file (defaults to `<corpus dir>/metadata.json`)
    #[arg(long, value_name = "PATH")]
    metadata: Option<PathBuf>,

    /// Extra classes to exclude, e.g. `--skip FE.2,9B`
    #[arg(long, value_name = "RULES", value_delimiter = ',')]
    skip: Vec<SkipRule>,

    /// Only generate the opcodes the variant adds to the baseline instruction set
    #[arg(long, action = clap::ArgAction::SetTrue, conflicts_with = "opcodes")]
    extensions_only: bool,
}

fn parse_opcode(s: &str) -> Result<u8, String> {
    let digits = s.trim_start_matches("0x").trim_start_matches("0X");
    u8::from_str_radix(digits, 16).map_err(|_| format!("{s:?} is not a hex opcode"))
}

fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .with_writer(std::io::stderr)
        .init();

    let args = Args::parse();
    run(args)
}

fn run(args: Args) -> anyhow::Result<()> {
    let env = GenConfig::from_env().context("read OPFIX_* environment")?;

    let metadata = match (&args.metadata, &args.corpus_dir) {
        (Some(path), _) => path.clone(),
        (None, Some(dir)) => dir.join("metadata.json"),
        (None, None) => env.metadata.clone(),
    };
    let corpus_dir = args.corpus_dir.unwrap_or(env.corpus_dir);
    let out_dir = args.out_dir.unwrap_or(env.out_dir);
    let variant = args.variant.unwrap_or(env.variant);

    let index = OpcodeIndex::load(&metadata)
        .with_context(|| format!("load opcode metadata {}", metadata.display()))?;

    let opcodes: Vec<u8> = if args.extensions_only {
        let ext = variant.extension_opcodes();
        if ext.is_empty() {
            bail!("variant {variant} has no extension opcodes");
        }
        ext.to_vec()
    } else {
        args.opcodes
    };
    let classes = select_classes(&index, &opcodes)?;

    let extra = env.extra_skips.into_iter().chain(args.skip);
    let policy = SkipPolicy::builtin(variant).with_rules(extra);
    let encoder = Encoder::new(&index, &policy);

    tracing::info!(
        %variant,
        classes = classes.len(),
        corpus = %corpus_dir.display(),
        out = %out_dir.display(),
        "generating fixtures"
    );
    let summary = generate(&encoder, &DirCorpus::new(&corpus_dir), &classes, &out_dir)?;

    println!(
        "wrote {} vectors in {} fixtures to {} ({} excluded, {} unavailable)",
        summary.vectors_written(),
        summary.encoded.len(),
        summary.out_dir.display(),
        summary.excluded.len(),
        summary.unavailable.len(),
    );

    if !summary.is_complete() {
        let missing: Vec<String> = summary.unavailable.iter().map(ToString::to_string).collect();
        bail!("corpus files unavailable for: {}", missing.join(", "));
    }
    Ok(())
}
