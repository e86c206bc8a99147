//! `courier version` — version information.

pub fn execute() {
    println!("courier {}", env!("CARGO_PKG_VERSION"));
}
