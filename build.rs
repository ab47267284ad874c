// build.rs

use clap::{Arg, ArgAction, Command};
use clap_mangen::Man;
use std::env;
use std::fs;
use std::path::PathBuf;

fn with_store_args(cmd: Command) -> Command {
    cmd.arg(
        Arg::new("db_path")
            .short('d')
            .long("db-path")
            .value_name("PATH")
            .default_value("recpack.db")
            .help("Database path"),
    )
    .arg(
        Arg::new("config")
            .short('c')
            .long("config")
            .value_name("PATH")
            .default_value("recpack.toml")
            .help("Configuration file (optional; defaults apply if missing)"),
    )
}

fn build_cli() -> Command {
    Command::new("recpack")
        .version(env!("CARGO_PKG_VERSION"))
        .author("Recpack Contributors")
        .about("Versioned record packages with reversible update logs")
        .subcommand_required(false)
        .subcommand(
            Command::new("init").about("Initialize the database").arg(
                Arg::new("db_path")
                    .short('d')
                    .long("db-path")
                    .value_name("PATH")
                    .default_value("recpack.db")
                    .help("Database path"),
            ),
        )
        .subcommand(with_store_args(
            Command::new("define")
                .about("Create or update a package definition")
                .arg(Arg::new("key").required(true).help("Package key"))
                .arg(
                    Arg::new("build")
                        .long("build")
                        .action(ArgAction::SetTrue)
                        .help("Classify mutations into this package"),
                )
                .arg(
                    Arg::new("filesystem_sync")
                        .long("filesystem-sync")
                        .action(ArgAction::SetTrue)
                        .help("Mirror package contents to the filesystem"),
                )
                .arg(Arg::new("fs_path").long("fs-path").help("Mirror directory"))
                .arg(
                    Arg::new("source")
                        .long("source")
                        .help("Directory the package is installed from"),
                )
                .arg(
                    Arg::new("include")
                        .long("include")
                        .action(ArgAction::Append)
                        .help("Classes to include (repeatable)"),
                )
                .arg(
                    Arg::new("exclude")
                        .long("exclude")
                        .action(ArgAction::Append)
                        .help("Classes to exclude (repeatable)"),
                ),
        ))
        .subcommand(with_store_args(
            Command::new("put")
                .about("Create or update a record from a JSON object")
                .arg(Arg::new("class").required(true).help("Record class"))
                .arg(
                    Arg::new("file")
                        .required(true)
                        .help("JSON file holding the plain object (- for stdin)"),
                ),
        ))
        .subcommand(with_store_args(
            Command::new("delete")
                .about("Delete a record")
                .arg(Arg::new("class").required(true))
                .arg(Arg::new("id").required(true)),
        ))
        .subcommand(with_store_args(
            Command::new("install")
                .about("Install a package from its source directory")
                .arg(Arg::new("key").required(true).help("Package key")),
        ))
        .subcommand(with_store_args(
            Command::new("import")
                .about("Import objects of one class from a JSON file")
                .arg(Arg::new("class").required(true))
                .arg(
                    Arg::new("file")
                        .required(true)
                        .help("JSON file holding an object or a list of objects"),
                )
                .arg(
                    Arg::new("package")
                        .short('p')
                        .long("package")
                        .help("Import on behalf of this package"),
                ),
        ))
        .subcommand(with_store_args(
            Command::new("export")
                .about("Export a package to a directory")
                .arg(Arg::new("key").required(true).help("Package key"))
                .arg(
                    Arg::new("out")
                        .short('o')
                        .long("out")
                        .help("Target directory (defaults to the package's mirror path)"),
                ),
        ))
        .subcommand(with_store_args(
            Command::new("history")
                .about("Show the update log")
                .arg(Arg::new("class").help("Only this class"))
                .arg(Arg::new("id").help("Only this record")),
        ))
        .subcommand(with_store_args(
            Command::new("conflicts").about("List recorded import conflicts").arg(
                Arg::new("package")
                    .short('p')
                    .long("package")
                    .help("Only conflicts of this package"),
            ),
        ))
        .subcommand(with_store_args(
            Command::new("rollback")
                .about("Revert the mutation recorded by a log entry")
                .arg(Arg::new("log_id").required(true).help("Update log record ID")),
        ))
        .subcommand(with_store_args(
            Command::new("packages").about("List package definitions"),
        ))
        .subcommand(
            Command::new("completions")
                .about("Generate shell completion scripts")
                .arg(
                    Arg::new("shell")
                        .required(true)
                        .value_parser(["bash", "elvish", "fish", "powershell", "zsh"])
                        .help("Shell type"),
                ),
        )
}

fn main() {
    println!("cargo:rerun-if-changed=build.rs");

    // Create man directory
    let out_dir = PathBuf::from(env::var("CARGO_MANIFEST_DIR").unwrap());
    let man_dir = out_dir.join("man");
    fs::create_dir_all(&man_dir).expect("Failed to create man directory");

    // Generate main man page
    let cmd = build_cli();
    let man = Man::new(cmd);
    let mut buffer = Vec::new();
    man.render(&mut buffer)
        .expect("Failed to render man page");

    let man_path = man_dir.join("recpack.1");
    fs::write(&man_path, buffer).expect("Failed to write man page");

    println!("cargo:warning=Man page generated at {}", man_path.display());
}
