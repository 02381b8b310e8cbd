use classgrid_core::EngineConfig;

pub fn print_default() -> anyhow::Result<()> {
    print!("{}", EngineConfig::default().to_toml_string()?);
    Ok(())
}
