use std::env;
use std::process;

use tracing::{event, Level};

use tristate::model::description;
use tristate::model::tree::State;
use tristate::model::Selection;

const USAGE: &str = "usage: tristate [-v] TREE.toml [LABEL[=checked|=unchecked]]...";

fn setup_tracing(verbose: bool) {
    let subscriber = tracing_subscriber::FmtSubscriber::builder()
        .with_max_level(if verbose { Level::TRACE } else { Level::INFO })
        .with_writer(std::io::stderr)
        .finish();

    if let Err(e) = tracing::subscriber::set_global_default(subscriber) {
        eprintln!("failed to install tracing subscriber: {}", e);
    }
}

/// A bare label clicks the control, so it flips the way a checkbox would.
fn parse_toggle(arg: &str, selection: &Selection) -> Result<(tristate::model::NodeId, State), String> {
    let (label, requested) = match arg.split_once('=') {
        Some((label, "checked")) => (label, Some(State::Checked)),
        Some((label, "unchecked")) => (label, Some(State::Unchecked)),
        Some((_, other)) => return Err(format!("can't request state \"{}\"", other)),
        None => (arg, None),
    };

    let id = selection.tree().find(label).ok_or_else(|| format!("no node labelled \"{}\"", label))?;
    let state = match requested {
        Some(state) => state,
        None => selection.state_of(id).map_err(|e| e.to_string())?.toggled(),
    };

    Ok((id, state))
}

fn run(path: &str, toggles: &[String]) -> Result<(), String> {
    let description = description::Description::load(path).map_err(|e| e.to_string())?;
    let tree = description.build().map_err(|e| e.to_string())?;
    let (tree, propagator) = description.config.resolve(&tree).map_err(|e| e.to_string())?;
    let mut selection = Selection::new(tree, propagator);

    event!(Level::INFO, path, nodes = selection.tree().len(), "loaded tree");

    for arg in toggles {
        let (id, state) = parse_toggle(arg, &selection)?;
        let changes = selection.apply_toggle(id, state).map_err(|e| e.to_string())?;

        println!("{} -> {}", arg, state);
        for change in changes {
            let label = selection.tree().get(change.id).map_err(|e| e.to_string())?.label.as_str();
            println!("  {}: {}", label, change.state);
        }
    }

    print!("{}", selection.tree());

    if let Err(e) = selection.check_consistency() {
        event!(Level::ERROR, "tree left inconsistent: {}", e);
    }

    Ok(())
}

fn main() {
    let mut args: Vec<String> = env::args().skip(1).collect();

    let verbose = args.first().map(String::as_str) == Some("-v");
    if verbose {
        args.remove(0);
    }

    setup_tracing(verbose);

    let (path, toggles) = match args.split_first() {
        Some((path, toggles)) => (path, toggles),
        None => {
            eprintln!("{}", USAGE);
            process::exit(2);
        },
    };

    if let Err(e) = run(path, toggles) {
        eprintln!("tristate: {}", e);
        process::exit(1);
    }
}
