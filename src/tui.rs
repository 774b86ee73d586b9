//! Terminal output helpers.
//!
//! Every macro takes an optional `greppable` and `accessible` pair. Greppable
//! mode silences them entirely so stdout only carries results; accessible mode
//! drops the coloured prefixes that screen readers trip over.

/// Something went wrong but the run goes on.
#[macro_export]
macro_rules! warning {
    ($name:expr) => {
        println!("{} {}", ansi_term::Colour::Red.bold().paint("[!]"), $name);
    };
    ($name:expr, $greppable:expr, $accessible:expr) => {
        if !$greppable {
            if $accessible {
                println!("{}", $name);
            } else {
                println!("{} {}", ansi_term::Colour::Red.bold().paint("[!]"), $name);
            }
        }
    };
}

/// Progress and bookkeeping information.
#[macro_export]
macro_rules! detail {
    ($name:expr) => {
        println!("{} {}", ansi_term::Colour::Blue.bold().paint("[~]"), $name);
    };
    ($name:expr, $greppable:expr, $accessible:expr) => {
        if !$greppable {
            if $accessible {
                println!("{}", $name);
            } else {
                println!("{} {}", ansi_term::Colour::Blue.bold().paint("[~]"), $name);
            }
        }
    };
}

/// A result the user asked for.
#[macro_export]
macro_rules! output {
    ($name:expr) => {
        println!(
            "{} {}",
            ansi_term::Colour::RGB(0, 255, 9).bold().paint("[>]"),
            $name
        );
    };
    ($name:expr, $greppable:expr, $accessible:expr) => {
        if !$greppable {
            if $accessible {
                println!("{}", $name);
            } else {
                println!(
                    "{} {}",
                    ansi_term::Colour::RGB(0, 255, 9).bold().paint("[>]"),
                    $name
                );
            }
        }
    };
}

/// Prints the start-up banner.
#[macro_export]
macro_rules! banner {
    () => {
        println!(
            "{}",
            ansi_term::Colour::Cyan.bold().paint(concat!(
                "reconprobe ",
                env!("CARGO_PKG_VERSION"),
                " :: lookup -> candidates -> live web hosts"
            ))
        );
        println!("{}", "-".repeat(60));
    };
}
