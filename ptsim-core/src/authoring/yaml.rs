use super::convert::Scenario;
use super::dto::SimulationSpecDto;
use anyhow::Result;

/// Parse a YAML string into a SimulationSpecDto.
///
/// Keys are NOT resolved here; use `load_scenario_yaml()` to get a
/// validated scenario.
pub fn parse_spec_yaml(yaml_str: &str) -> Result<SimulationSpecDto> {
    let dto: SimulationSpecDto = serde_yaml::from_str(yaml_str)?;
    Ok(dto)
}

/// Parse and validate in one step.
pub fn load_scenario_yaml(yaml_str: &str) -> Result<Scenario> {
    Ok(parse_spec_yaml(yaml_str)?.into_scenario()?)
}
