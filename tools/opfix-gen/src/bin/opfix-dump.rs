#![forbid(unsafe_code)]

use std::fs::File;
use std::io::BufReader;
use std::path::PathBuf;

use anyhow::Context;
use clap::Parser;
use opfix::{FixtureReader, RegisterField, TestVector};

#[derive(Parser, Debug)]
#[command(name = "opfix-dump", about = "Print the contents of a binary conformance fixture.")]
struct Args {
    /// Fixture file (`XX.bin` or `XX.N.bin`)
    fixture: PathBuf,

    /// Print registers and memory of this vector instead of the summary table
    #[arg(long, value_name = "INDEX")]
    vector: Option<usize>,
}

fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .with_writer(std::io::stderr)
        .init();

    let args = Args::parse();
    let file = File::open(&args.fixture)
        .with_context(|| format!("open {}", args.fixture.display()))?;
    let mut reader = FixtureReader::new(BufReader::new(file))?;

    if args.vector.is_none() {
        println!("{}: {} vectors", args.fixture.display(), reader.declared_count());
    }

    let mut index = 0;
    while let Some(vector) = reader.next_vector()? {
        match args.vector {
            None => println!(
                "{index:>6}  mask={:#06x} cycles={:<3} queue={} ram={}/{}  {}",
                vector.flags_mask,
                vector.cycles,
                vector.queue_len,
                vector.initial_ram.len(),
                vector.final_ram.len(),
                vector.name
            ),
            Some(wanted) if wanted == index => {
                print_vector(index, &vector);
                return Ok(());
            }
            Some(_) => {}
        }
        index += 1;
    }

    if let Some(wanted) = args.vector {
        anyhow::bail!("fixture has {index} vectors; no vector {wanted}");
    }
    Ok(())
}

fn print_vector(index: usize, v: &TestVector) {
    println!("vector {index}: {}", v.name);
    println!("flags mask {:#06x}, {} cycles, queue {}", v.flags_mask, v.cycles, v.queue_len);
    println!("{:<6} {:>8} {:>8}", "reg", "initial", "final");
    for field in RegisterField::ALL {
        let (before, after) = (v.initial_regs.get(field), v.final_regs.get(field));
        let marker = if before != after { " *" } else { "" };
        println!("{:<6} {before:>#8x} {after:>#8x}{marker}", field.name());
    }
    for (label, ram) in [("initial", &v.initial_ram), ("final", &v.final_ram)] {
        println!("{label} ram:");
        for m in ram {
            println!("  {:05x} = {:02x}", m.addr, m.value);
        }
    }
}
