use std::{path::PathBuf, time::Duration};

use log::{error, info};
use structopt::StructOpt;
use trainlbbd::{
    deadlock::DeadlockConfig,
    lbbd::{self, LbbdConfig, LbbdStatus, MasterKind, SubproblemKind},
    parser,
    solution::SolutionFile,
};

#[derive(StructOpt, Debug)]
#[structopt(name = "trainlbbd")]
struct Opt {
    /// Wall-clock time limit in seconds
    #[structopt(long)]
    time_limit: Option<f64>,

    /// Maximum number of master candidates to check
    #[structopt(long)]
    iterations: Option<usize>,

    /// Subproblem backend: difflogic or gurobi
    #[structopt(long, default_value = "difflogic")]
    backend: String,

    /// Master engine: bnb, gurobi (lazy constraints) or gurobi-restart
    #[structopt(long, default_value = "bnb")]
    master: String,

    #[structopt(long)]
    no_swaps: bool,

    #[structopt(long)]
    no_cycles: bool,

    #[structopt(long)]
    no_path_pruning: bool,

    #[structopt(long)]
    no_minimize_cores: bool,

    /// Big-M for optimality cuts, at least the bound derived from the instance
    #[structopt(long)]
    big_m: Option<i64>,

    /// Where to write the solution (default: solutions/solution_<instance>)
    #[structopt(long, parse(from_os_str))]
    output: Option<PathBuf>,

    /// Also write the run statistics as JSON
    #[structopt(long, parse(from_os_str))]
    stats: Option<PathBuf>,

    #[structopt(name = "INSTANCE", parse(from_os_str))]
    instance: PathBuf,
}

fn config_from(opt: &Opt) -> Result<LbbdConfig, String> {
    let subproblem = match opt.backend.as_str() {
        "difflogic" => SubproblemKind::DiffLogic,
        "gurobi" => SubproblemKind::Gurobi,
        x => return Err(format!("unknown subproblem backend {:?}", x)),
    };
    let master = match opt.master.as_str() {
        "bnb" => MasterKind::BranchAndCut,
        "gurobi" => MasterKind::Gurobi { lazy: true },
        "gurobi-restart" => MasterKind::Gurobi { lazy: false },
        x => return Err(format!("unknown master engine {:?}", x)),
    };
    Ok(LbbdConfig {
        time_limit: opt.time_limit.map(Duration::from_secs_f64),
        iteration_limit: opt.iterations,
        big_m: opt.big_m,
        master,
        subproblem,
        deadlock: DeadlockConfig {
            swaps: !opt.no_swaps,
            cycles: !opt.no_cycles,
            path_pruning: !opt.no_path_pruning,
        },
        minimize_cores: !opt.no_minimize_cores,
        record_cuts: false,
    })
}

fn run(opt: &Opt) -> Result<(), Box<dyn std::error::Error>> {
    let config = config_from(opt)?;
    let instance = parser::read_file(&opt.instance)?;

    let mut stats = serde_json::Map::new();
    let result = lbbd::solve(&instance.problem, &config, |k, v| {
        stats.insert(k, v);
    })?;

    if let Some(path) = opt.stats.as_ref() {
        std::fs::write(path, serde_json::to_string_pretty(&stats)?)?;
    }

    println!(
        "{:?} after {} iterations ({} feasibility cuts, {} optimality cuts) in {:.2}s",
        result.status,
        result.stats.iterations,
        result.stats.feasibility_cuts,
        result.stats.optimality_cuts,
        result.stats.elapsed.as_secs_f64()
    );

    let incumbent = match result.incumbent {
        Some(incumbent) => incumbent,
        None => {
            if result.status == LbbdStatus::Infeasible {
                println!("The instance has no feasible solution");
            } else {
                println!("No feasible solution within limits");
            }
            return Ok(());
        }
    };

    let cost = instance.problem.verify_solution(&incumbent.events)?;
    info!("Solution verified with cost {}", cost);
    println!(
        "Cost {} (found in iteration {} after {:.2}s)",
        incumbent.objective,
        incumbent.iteration,
        incumbent.found_after.as_secs_f64()
    );

    let output = opt.output.clone().unwrap_or_else(|| {
        let name = opt
            .instance
            .file_name()
            .map(|n| n.to_string_lossy().to_string())
            .unwrap_or_else(|| "instance.json".to_string());
        PathBuf::from("solutions").join(format!("solution_{}", name))
    });
    SolutionFile::new(incumbent.objective, incumbent.events).write(&output)?;
    Ok(())
}

fn main() {
    pretty_env_logger::init();
    let opt = Opt::from_args();
    hprof::start_frame();
    let result = run(&opt);
    hprof::profiler().print_timing();
    if let Err(e) = result {
        error!("{}", e);
        eprintln!("error: {}", e);
        std::process::exit(1);
    }
}
