use std::env::args;
use std::str::FromStr;

use guarded_monitors::{bank, buffer, peterson, semaphore, Config};
use log::info;
use strum::IntoEnumIterator;
use strum_macros::{Display, EnumIter, EnumString};

fn main() -> Result<(), String> {
    env_logger::init();

    let config = Config::from_env().map_err(|e| e.to_string())?;
    info!("gate config: {:?}", config.gate());

    args()
        .nth(1)
        .ok_or(format!(
            "no demo supplied, use one of {} or see unit tests",
            Demo::iter()
                .map(|d| d.to_string())
                .collect::<Vec<String>>()
                .join(",")
        ))
        .and_then(|selector| {
            Demo::from_str(&selector)
                .map(|demo| match demo {
                    Demo::Bank => bank::run(&config),
                    Demo::Waiting => bank::waiting(&config),
                    Demo::Semaphore => semaphore::run(&config),
                    Demo::Buffer => buffer::run(&config),
                    Demo::Peterson => peterson::run(),
                })
                .map_err(|e| format!("{selector}: {e}"))
        })
}

#[derive(EnumIter, EnumString, Display)]
#[strum(serialize_all = "snake_case")]
enum Demo {
    Bank,
    Waiting,
    Semaphore,
    Buffer,
    Peterson,
}
