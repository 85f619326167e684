use camino::Utf8PathBuf;
use clap::{Parser, ValueEnum};
use nagare::Entry;

#[derive(ValueEnum, Debug, Clone, Copy, Default)]
enum Target {
    /// Build into `dev/`, serve with live reload and watch sources.
    #[default]
    Dev,
    /// Build minified output into `prod/` and serve it.
    Prod,
}

impl From<Target> for Entry {
    fn from(target: Target) -> Self {
        match target {
            Target::Dev => Entry::Dev,
            Target::Prod => Entry::Prod,
        }
    }
}

#[derive(Parser, Debug)]
#[command(version, about)]
struct Args {
    #[clap(value_enum, index = 1, default_value = "dev")]
    target: Target,

    /// Project root containing `src/`.
    #[clap(long, default_value = ".")]
    root: Utf8PathBuf,

    /// Print the task graph as a Mermaid diagram and exit.
    #[clap(long)]
    graph: bool,
}

fn main() -> anyhow::Result<()> {
    let args = Args::parse();
    let entry = Entry::from(args.target);

    if args.graph {
        println!("{}", entry.graph());
        return Ok(());
    }

    #[cfg(feature = "logging")]
    nagare::logging::init();

    nagare::run(entry, args.root)?;
    Ok(())
}
