use crate::features::Sensitivity;
use crate::filter::FilterConfig;
use std::io;
use std::str::FromStr;

/// TOML-backed configuration store.
pub struct Config {
    value: toml::Value,
}

impl Default for Config {
    fn default() -> Config {
        Config {
            value: toml::Value::Table(toml::map::Map::new()),
        }
    }
}

impl Config {
    /// Get an entry by path. If the input argument contains dots, the path is split
    /// into keys, each key being requested recursively.
    pub fn get<T: AsRef<str>>(&self, k: T) -> Option<&str> {
        let mut item = &self.value;
        for key in k.as_ref().split('.') {
            item = item.get(key)?;
        }
        item.as_str()
    }

    /// Get an entry of type integer by path
    pub fn get_usize<T: AsRef<str>>(&self, k: T) -> Option<usize> {
        let mut item = &self.value;
        for key in k.as_ref().split('.') {
            item = item.get(key)?;
        }
        item.as_integer()
            .and_then(|i| if i >= 0 { Some(i as usize) } else { None })
    }

    /// Get an entry of type boolean by path
    pub fn get_bool<T: AsRef<str>>(&self, k: T) -> Option<bool> {
        let mut item = &self.value;
        for key in k.as_ref().split('.') {
            item = item.get(key)?;
        }
        item.as_bool()
    }

    /// Set a top-level entry, overwriting a previous value
    pub fn set<V: Into<toml::Value>>(&mut self, k: &str, v: V) {
        if let toml::Value::Table(table) = &mut self.value {
            table.insert(k.to_string(), v.into());
        }
    }

    /// Load configuration from input object. If keys are already present, they are overwritten
    pub fn load_config<R: io::Read>(&mut self, mut config: R) -> Result<(), io::Error> {
        let mut s = String::new();
        config.read_to_string(&mut s)?;
        match toml::Value::from_str(&s) {
            Ok(value) => {
                self.value = value;
                Ok(())
            }
            _ => Err(io::Error::new(
                io::ErrorKind::Other,
                "Load configuration failed",
            )),
        }
    }
}

/// Presentation toggles for summary lines and connection reports.
#[derive(Clone, Copy, Debug)]
pub struct DisplayConfig {
    pub general_info: bool,
    pub tcp_features: bool,
    pub tcp_options: bool,
    pub header_flags: bool,
    pub length: bool,
    pub ack_seq: bool,
}

impl Default for DisplayConfig {
    fn default() -> Self {
        DisplayConfig {
            general_info: true,
            tcp_features: true,
            tcp_options: true,
            header_flags: true,
            length: true,
            ack_seq: true,
        }
    }
}

impl DisplayConfig {
    pub fn from_config(config: &Config) -> Self {
        DisplayConfig {
            general_info: config.get_bool("display.general_info").unwrap_or(true),
            tcp_features: config.get_bool("display.tcp_features").unwrap_or(true),
            tcp_options: config.get_bool("display.tcp_options").unwrap_or(true),
            header_flags: config.get_bool("display.header_flags").unwrap_or(true),
            length: config.get_bool("display.length").unwrap_or(true),
            ack_seq: config.get_bool("display.ack_seq").unwrap_or(true),
        }
    }
}

impl FilterConfig {
    pub fn from_config(config: &Config) -> Self {
        FilterConfig {
            show_ipv4: config.get_bool("filter.show_ipv4").unwrap_or(true),
            show_ipv6: config.get_bool("filter.show_ipv6").unwrap_or(true),
            selected: None,
            host_filter: config.get("filter.host").map(str::to_string),
            port_filter: config.get("filter.port").map(str::to_string),
        }
    }
}

/// Sensitivity preset named in the configuration; `BALANCED` when unset
/// or unrecognized.
pub fn sensitivity_from_config(config: &Config) -> Sensitivity {
    match config.get("sensitivity") {
        Some(name) => Sensitivity::from_name(name).unwrap_or_else(|| {
            warn!("unknown sensitivity `{name}`, using BALANCED");
            Sensitivity::default()
        }),
        None => Sensitivity::default(),
    }
}
