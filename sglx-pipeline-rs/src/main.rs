fn main() {
    sglx_pipeline::cli::run();
}
