//! `ft245-validator` command-line entry point

fn main() {
    std::process::exit(ft245_validator_lib::run());
}
