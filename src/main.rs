#![allow(dead_code)]

use std::fs::File;
use std::io::BufWriter;
use std::path::Path;
use std::process::exit;

use clap::{Args, Parser, Subcommand};
use log::{error, info};

use demand::DayType;
use graph::Graph;
use serialization::results::{export_results, import_trip_records, TripSummary};
use simulation::Simulation;
use test::random_samples;
use timetable::{pre_timetable, write_timetable};

mod col;
mod config;
mod demand;
mod disruption;
mod geometry;
mod graph;
mod input;
mod network;
mod passenger;
mod path;
mod population;
mod primitives;
mod reroute;
mod serialization;
mod simulation;
mod timer;
mod timetable;
mod train;

#[derive(Parser, Debug)]
#[command(
    version,
    author,
    about = "Discrete-event simulation of passenger flows on a metro network under disruptions"
)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand, Clone, Debug)]
enum Commands {
    #[command(about = "Simulate one service day and export the results")]
    Run(RunArgs),

    #[command(about = "Write the undisturbed timetable of the fleet")]
    PreTimetable(PreTimetableArgs),

    #[command(about = "Summarize the trips of an exported run")]
    Report(ReportArgs),

    #[command(about = "Run random sample")]
    RunRandom,
}

#[derive(Args, Clone, Debug)]
struct RunArgs {
    #[arg(
        short,
        long,
        default_value = ".",
        help = "Directory with Config.csv, Stations.csv, Lines.csv, LineStops.csv and the disruption files."
    )]
    input_dir: String,

    #[arg(short, long, value_enum, default_value_t = DayType::Weekday)]
    day_type: DayType,

    #[arg(
        short,
        long,
        default_value_t = -1,
        allow_negative_numbers = true,
        help = "The number of ticks to run. Negative means until the end of service."
    )]
    max_steps: i64,

    #[arg(
        short = 'o',
        long,
        default_value = "metrosim-results.sqlite3",
        help = "The file to write trips, the real timetable and the disruption log to."
    )]
    out_filename: String,

    #[arg(
        short,
        long,
        help = "Also write the real timetable as CSV to this file."
    )]
    timetable_filename: Option<String>,
}

#[derive(Args, Clone, Debug)]
struct PreTimetableArgs {
    #[arg(short, long, default_value = ".")]
    input_dir: String,

    #[arg(short = 'o', long, default_value = "PreTimetable.csv")]
    out_filename: String,
}

#[derive(Args, Clone, Debug)]
struct ReportArgs {
    #[arg(short, long, default_value = "metrosim-results.sqlite3")]
    results_filename: String,
}

fn ensure_missing(filename: &str) {
    if Path::new(filename).exists() {
        error!("Output file already exists: {}", filename);
        exit(1);
    }
}

fn write_timetable_file(
    graph: &Graph,
    entries: &[timetable::TimetableEntry],
    filename: &str,
) -> Result<(), csv::Error> {
    let file = File::create(filename)?;
    write_timetable(graph, entries, BufWriter::new(file))
}

fn main_run(args: &RunArgs) {
    ensure_missing(&args.out_filename);
    if let Some(timetable_filename) = &args.timetable_filename {
        ensure_missing(timetable_filename);
    }

    let input = input::load_input(Path::new(&args.input_dir)).unwrap_or_else(|it| {
        error!("Could not read input:\n{:#?}", it);
        exit(1);
    });
    let mut simulation = Simulation::new(input.config, input.network, input.disruptions);
    if let Err(err) = simulation.init(args.day_type) {
        error!("Could not initialize simulation:\n{:#?}", err);
        exit(1);
    }
    if let Err(err) = simulation.run(args.max_steps) {
        error!("Simulation failed: {:?}", err);
        exit(1);
    }
    info!("Stats: {:?}", simulation.stats());
    simulation.timer().log_summary();

    let entries = simulation.real_timetable().to_vec();
    let disruptions = simulation.disruptions().clone();
    let Some((graph, population)) = simulation.graph_and_population() else {
        error!("Simulation was not initialized");
        exit(1);
    };
    if let Some(timetable_filename) = &args.timetable_filename {
        if let Err(err) = write_timetable_file(graph, &entries, timetable_filename) {
            error!("Could not write timetable: {}", err);
            exit(1);
        }
    }
    let result = export_results(
        graph,
        population.all_passengers(),
        &entries,
        &disruptions,
        &args.out_filename,
    );
    if let Err(err) = result {
        error!("Could not export results: {}", err);
        exit(1);
    }
}

fn main_pre_timetable(args: &PreTimetableArgs) {
    ensure_missing(&args.out_filename);

    let input = input::load_input(Path::new(&args.input_dir)).unwrap_or_else(|it| {
        error!("Could not read input:\n{:#?}", it);
        exit(1);
    });
    let config = input.config;
    let graph = Graph::create(
        &input.network,
        config.train_capacity,
        config.travel_params(),
    )
    .unwrap_or_else(|it| {
        error!("Could not build graph:\n{:#?}", it);
        exit(1);
    });
    let trains =
        train::create_fleet(&graph, config.start_time, config.dwell_time).unwrap_or_else(|it| {
            error!("Could not place trains:\n{:#?}", it);
            exit(1);
        });
    info!("Computing pre-timetable for {} trains...", trains.len());
    let entries = pre_timetable(&graph, trains, config.dwell_time, config.end_time);
    info!("Number timetable entries: {}", entries.len());
    if let Err(err) = write_timetable_file(&graph, &entries, &args.out_filename) {
        error!("Could not write timetable: {}", err);
        exit(1);
    }
}

fn main_report(args: &ReportArgs) {
    let records = import_trip_records(&args.results_filename).unwrap_or_else(|it| {
        error!("Could not import results:\n{:#?}", it);
        exit(1);
    });
    TripSummary::from_records(&records).log();
}

fn main() {
    env_logger::builder().parse_env("LOG").init();
    let cli = Cli::parse();

    match cli.command {
        Commands::Run(args) => main_run(&args),
        Commands::PreTimetable(args) => main_pre_timetable(&args),
        Commands::Report(args) => main_report(&args),
        Commands::RunRandom => random_samples::run_samples(),
    }
}
