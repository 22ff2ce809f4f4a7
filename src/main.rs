fn main() -> anyhow::Result<()> {
    zeen_sync::run()
}
