fn main() -> anyhow::Result<()> {
    pin_traveler::cli::run()
}
