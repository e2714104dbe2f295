use crate::config::Config;
use crate::process::CommandSpec;

/// Splits a free form parameter string like `"-s 2048000  -g 20"`
pub fn split_parameters(params: Option<&str>) -> Vec<String> {
    return match params {
        Some(p) => p.split_whitespace().map(str::to_string).collect(),
        None => Vec::new(),
    };
}

pub fn tuner_command(config: &Config) -> CommandSpec {
    let args = split_parameters(config.custom_parameters.rtltcp.as_deref());
    return CommandSpec::new(&config.programs.rtltcp, args);
}

pub fn decoder_command(config: &Config) -> CommandSpec {
    /* every protocol only once, but keep the order of the meters */
    let mut protocols: Vec<&str> = Vec::new();
    for meter in config.meters.iter() {
        let proto = meter.protocol.trim();
        if !protocols.contains(&proto) {
            protocols.push(proto);
        }
    }

    let mut args = vec![
        format!("-msgtype={}", protocols.join(",")),
        format!("-format={}", config.general.format.to_string()),
        format!("-filterid={}", config.meter_ids().join(",")),
    ];
    args.extend(split_parameters(config.custom_parameters.rtlamr.as_deref()));

    return CommandSpec::new(&config.programs.rtlamr, args).with_stdout();
}
