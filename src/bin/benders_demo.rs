//! Benders demo: solves a bundled problem by decomposition and checks the
//! result against its monolithic formulation.

use clap::{Parser, ValueEnum};
use log::info;

use benders::benders::{BendersConfig, BendersOutcome, FeasibilityCutMode, Protocol};
use benders::lp::SolverConfig;
use benders::problems::dakota::Dakota;
use benders::problems::timetabling::Timetabling;

#[derive(Clone, Copy, Debug, ValueEnum)]
enum Problem {
    Dakota,
    Timetabling,
}

#[derive(Clone, Copy, Debug, ValueEnum)]
enum ProtocolArg {
    Iterative,
    Lazy,
}

#[derive(Parser)]
#[command(name = "benders_demo")]
#[command(about = "Benders decomposition with lazy cuts and subproblem caching")]
struct Cli {
    /// Problem to solve
    #[arg(long, value_enum, default_value = "dakota")]
    problem: Problem,

    /// How cuts reach the master
    #[arg(long, value_enum, default_value = "iterative")]
    protocol: ProtocolArg,

    #[arg(long, default_value = "100")]
    max_iterations: usize,

    /// Warm up on the LP relaxation of the master
    #[arg(long)]
    relaxed_phase: bool,

    /// Re-solve every subproblem instead of reusing results
    #[arg(long)]
    no_cache: bool,

    /// Only generate no-good feasibility cuts
    #[arg(long)]
    no_good_only: bool,
}

impl Cli {
    fn config(&self) -> BendersConfig {
        BendersConfig {
            max_iterations: self.max_iterations,
            protocol: match self.protocol {
                ProtocolArg::Iterative => Protocol::Iterative,
                ProtocolArg::Lazy => Protocol::LazyCallback,
            },
            relaxed_phase: self.relaxed_phase,
            use_cache: !self.no_cache,
            feasibility_cuts: if self.no_good_only {
                FeasibilityCutMode::NoGoodOnly
            } else {
                FeasibilityCutMode::Strongest
            },
            ..BendersConfig::default()
        }
    }
}

fn report(outcome: &BendersOutcome, reference: f64) {
    println!("status:        {:?}", outcome.status);
    println!("iterations:    {}", outcome.iterations);
    println!("cuts:          {}", outcome.cuts.len());
    println!(
        "cache:         {} hits, {} misses",
        outcome.cache.hits, outcome.cache.misses
    );
    println!("lower bound:   {:.6}", outcome.lower_bound);
    match outcome.objective {
        Some(objective) => {
            println!("objective:     {:.6}", objective);
            println!("monolithic:    {:.6}", reference);
            println!(
                "gap:           {:.3e}",
                (objective - reference).abs() / reference.abs().max(1.0)
            );
        }
        None => println!("objective:     none found"),
    }
}

fn main() -> benders::Result<()> {
    env_logger::init();
    let cli = Cli::parse();
    let config = cli.config();
    let solver = SolverConfig::default();
    info!("solving {:?} with {:?}", cli.problem, config.protocol);

    match cli.problem {
        Problem::Dakota => {
            let dakota = Dakota::default();
            let mut controller = dakota.controller(config)?;
            let outcome = controller.solve()?;
            let reference = dakota.solve_monolithic(&solver)?;
            report(&outcome, reference.objective);
            let master = controller.master();
            for &x in master.first_stage() {
                println!("{:<14} {:.3}", master.model().var_name(x), outcome.value(x));
            }
            if let Some(objective) = outcome.objective {
                println!("profit:        {:.3}", -objective);
            }
        }
        Problem::Timetabling => {
            let tt = Timetabling::default();
            let (mut controller, place) = tt.controller(config)?;
            let outcome = controller.solve()?;
            let reference = tt.solve_monolithic(&solver)?;
            report(&outcome, reference.objective);
            for (exam, slot) in tt.schedule(&place, &outcome.values).iter().enumerate() {
                match slot {
                    Some(slot) => println!("exam {} -> slot {}", exam, slot),
                    None => println!("exam {} -> unplaced", exam),
                }
            }
        }
    }
    Ok(())
}
