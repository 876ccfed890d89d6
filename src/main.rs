fn main() {
    std::process::exit(upp::cli::run());
}
