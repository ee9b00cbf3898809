//! Reconstruction chunks
//!
//! Prints the slice ranges of the chunks a stack of normalized projections is
//! reconstructed with, either for a given chunk size:
//! ```shell
//! chunk-plan 1800 2048 2560 --chunk-size 64
//! ```
//! or for the largest chunks fitting into a memory budget:
//! ```shell
//! chunk-plan 1800 2048 2560 --budget-mb 4096
//! ```

use anyhow::bail;
use structopt::StructOpt;
use tomo_prep::ChunkPlan;

const MB: usize = 1 << 20;

#[derive(Debug, StructOpt)]
#[structopt(name = "chunk-plan", about = "Reconstruction chunks of a projection stack")]
struct Opt {
    /// Number of projections
    n_projection: usize,
    /// Number of slices along the reconstruction axis
    n_slice: usize,
    /// Projection width
    width: usize,
    /// Number of slices per chunk
    #[structopt(short, long)]
    chunk_size: Option<usize>,
    /// Memory budget per chunk [MB]
    #[structopt(short, long = "budget-mb")]
    budget: Option<usize>,
}

fn main() -> anyhow::Result<()> {
    env_logger::init();
    let opt = Opt::from_args();

    let shape = [opt.n_projection, opt.n_slice, opt.width];
    let plan = match (opt.chunk_size, opt.budget) {
        (Some(chunk_size), None) => ChunkPlan::new(opt.n_slice, chunk_size)?,
        (None, Some(budget)) => ChunkPlan::for_memory_budget(shape, budget * MB)?,
        _ => bail!("either --chunk-size or --budget-mb must be given"),
    };
    log::info!("{:?}", plan);

    println!("{plan}");
    println!(
        "largest chunk working set: {:.1}MB",
        plan.chunk_bytes(shape) as f64 / MB as f64
    );
    for (k, range) in plan.ranges().enumerate() {
        println!(" - #{k:>4}: [{:>6},{:>6}[", range.start, range.end);
    }

    Ok(())
}
