//! Command-line surface: one `clap` option group (`can` by default, per
//! §6's "a single option group … contributes all parameters by long
//! name") covering every back-end's configuration schema. This is sugar
//! over [`crate::config::Config`] — nothing here is required to use the
//! library programmatically.
//!
//! Every flag is optional; an absent flag leaves the corresponding
//! [`crate::config::ParamSpec`]'s declared default in place. Exit policy on
//! a bad value is delegated to the caller (clap itself exits on unparsable
//! flags; out-of-range values surface as a normal [`ConfigError`] from
//! [`Config::set_str`](crate::config::Config::set_str) instead of a process
//! exit, since range/choice constraints are this crate's own schema, not
//! clap's).

use clap::Args;

use crate::backend::{cpc, serial, usb};
use crate::config::{Config, ConfigError};
use crate::error::CanOpenError;

/// The `can` option group: every CPC/Serial/USB parameter as a `--name`
/// flag. Unset fields fall back to each parameter's declared default.
#[derive(Debug, Clone, Default, Args)]
#[command(next_help_heading = "can")]
pub struct CanOpenArgs {
    /// CAN-CPC device / SocketCAN interface name
    #[arg(long)]
    pub cpc_dev: Option<String>,
    /// CAN bus bitrate in kbit/s
    #[arg(long)]
    pub cpc_bit_rate: Option<String>,
    /// time quanta per bit
    #[arg(long)]
    pub cpc_quanta_per_bit: Option<String>,
    /// bit sampling point, as a fraction of the bit time
    #[arg(long)]
    pub cpc_sampling_point: Option<String>,
    /// CAN-CPC read/write timeout in seconds
    #[arg(long)]
    pub cpc_timeout: Option<String>,

    /// RS-232 device path
    #[arg(long)]
    pub serial_dev: Option<String>,
    /// baud rate
    #[arg(long)]
    pub serial_baud_rate: Option<String>,
    /// data bits
    #[arg(long)]
    pub serial_data_bits: Option<String>,
    /// stop bits
    #[arg(long)]
    pub serial_stop_bits: Option<String>,
    /// parity: none, odd, even
    #[arg(long)]
    pub serial_parity: Option<String>,
    /// flow control: off, xon_xoff, rts_cts
    #[arg(long)]
    pub serial_flow_ctrl: Option<String>,
    /// CAN-Serial read/write timeout in seconds
    #[arg(long)]
    pub serial_timeout: Option<String>,

    /// FTDI device serial number (empty selects the first device found)
    #[arg(long)]
    pub usb_dev: Option<String>,
    /// FTDI interface selector: any, a, b, c, d
    #[arg(long)]
    pub usb_serial_interface: Option<String>,
    /// baud rate
    #[arg(long)]
    pub usb_serial_baud_rate: Option<String>,
    /// data bits
    #[arg(long)]
    pub usb_serial_data_bits: Option<String>,
    /// stop bits
    #[arg(long)]
    pub usb_serial_stop_bits: Option<String>,
    /// parity: none, odd, even, mark, space
    #[arg(long)]
    pub usb_serial_parity: Option<String>,
    /// flow control: off, xon_xoff, rts_cts, dtr_dsr
    #[arg(long)]
    pub usb_serial_flow_ctrl: Option<String>,
    /// break condition: off, on
    #[arg(long)]
    pub usb_serial_break: Option<String>,
    /// CAN-USB read/write timeout in seconds
    #[arg(long)]
    pub usb_serial_timeout: Option<String>,
    /// FTDI latency timer, in seconds
    #[arg(long)]
    pub usb_serial_latency: Option<String>,
}

impl CanOpenArgs {
    /// Builds a validated CAN-CPC [`Config`] from whichever `--cpc-*` flags
    /// were given, falling back to [`cpc::PARAMS`]'s defaults otherwise.
    pub fn cpc_config(&self) -> Result<Config, CanOpenError> {
        let mut cfg = Config::from_defaults(cpc::PARAMS);
        apply(
            &mut cfg,
            &[
                ("cpc-dev", &self.cpc_dev),
                ("cpc-bit-rate", &self.cpc_bit_rate),
                ("cpc-quanta-per-bit", &self.cpc_quanta_per_bit),
                ("cpc-sampling-point", &self.cpc_sampling_point),
                ("cpc-timeout", &self.cpc_timeout),
            ],
        )?;
        Ok(cfg)
    }

    /// Builds a validated CAN-Serial [`Config`] from whichever
    /// `--serial-*` flags were given.
    pub fn serial_config(&self) -> Result<Config, CanOpenError> {
        let mut cfg = Config::from_defaults(serial::PARAMS);
        apply(
            &mut cfg,
            &[
                ("serial-dev", &self.serial_dev),
                ("serial-baud-rate", &self.serial_baud_rate),
                ("serial-data-bits", &self.serial_data_bits),
                ("serial-stop-bits", &self.serial_stop_bits),
                ("serial-parity", &self.serial_parity),
                ("serial-flow-ctrl", &self.serial_flow_ctrl),
                ("serial-timeout", &self.serial_timeout),
            ],
        )?;
        Ok(cfg)
    }

    /// Builds a validated CAN-USB [`Config`] from whichever `--usb-*`
    /// flags were given.
    pub fn usb_config(&self) -> Result<Config, CanOpenError> {
        let mut cfg = Config::from_defaults(usb::PARAMS);
        apply(
            &mut cfg,
            &[
                ("usb-dev", &self.usb_dev),
                ("usb-serial-interface", &self.usb_serial_interface),
                ("usb-serial-baud-rate", &self.usb_serial_baud_rate),
                ("usb-serial-data-bits", &self.usb_serial_data_bits),
                ("usb-serial-stop-bits", &self.usb_serial_stop_bits),
                ("usb-serial-parity", &self.usb_serial_parity),
                ("usb-serial-flow-ctrl", &self.usb_serial_flow_ctrl),
                ("usb-serial-break", &self.usb_serial_break),
                ("usb-serial-timeout", &self.usb_serial_timeout),
                ("usb-serial-latency", &self.usb_serial_latency),
            ],
        )?;
        Ok(cfg)
    }
}

fn apply(cfg: &mut Config, pairs: &[(&str, &Option<String>)]) -> Result<(), ConfigError> {
    for (name, value) in pairs {
        if let Some(text) = value {
            cfg.set_str(name, text)?;
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use clap::Parser;

    #[derive(Parser)]
    struct TestCli {
        #[command(flatten)]
        can: CanOpenArgs,
    }

    #[test]
    fn unset_flags_fall_back_to_defaults() {
        let cli = TestCli::parse_from(["prog"]);
        let cfg = cli.can.cpc_config().unwrap();
        assert_eq!(cfg.get_str("cpc-dev").unwrap(), "can0");
    }

    #[test]
    fn flags_override_defaults() {
        let cli = TestCli::parse_from(["prog", "--serial-baud-rate", "9600"]);
        let cfg = cli.can.serial_config().unwrap();
        assert_eq!(cfg.get_int("serial-baud-rate").unwrap(), 9600);
    }

    #[test]
    fn out_of_range_flag_is_rejected_not_exited() {
        let cli = TestCli::parse_from(["prog", "--usb-serial-baud-rate", "1"]);
        assert!(cli.can.usb_config().is_err());
    }
}
