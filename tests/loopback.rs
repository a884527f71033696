//! Full-stack power supply tests against an in-process fake instrument.
//!
//! The fake speaks the DT14xx ASCII protocol over TCP, which exercises the
//! real codec, transport and session layers end to end. Only board 0 exists;
//! commands addressed to any other board get no reply at all, like an absent
//! board on a real daisy chain.

use std::collections::{HashMap, VecDeque};
use std::io::{BufRead, BufReader, Write};
use std::net::TcpListener;
use std::sync::{Arc, Mutex};
use std::thread;
use std::time::Duration;

use assert_matches::assert_matches;

use caenkit::{CaenError, ChannelStatus, PowerSupply, RampOptions, SupplyConfig};

#[derive(Default)]
struct FakeState {
    /// Parameter store keyed by (channel, parameter); `None` is board level.
    params: HashMap<(Option<u8>, String), String>,
    /// Scripted STAT answers, consumed front to back; `default_stat` after.
    stat_script: VecDeque<u16>,
    default_stat: u16,
    /// Raw request lines in arrival order.
    requests: Vec<String>,
    /// When set, replies are sent without their line terminator.
    truncate_replies: bool,
}

struct FakeSupply {
    addr: String,
    state: Arc<Mutex<FakeState>>,
}

impl FakeSupply {
    fn start() -> FakeSupply {
        let listener = TcpListener::bind("127.0.0.1:0").unwrap();
        let addr = listener.local_addr().unwrap().to_string();
        let state = Arc::new(Mutex::new(FakeState {
            default_stat: 0b0001, // output on, not ramping
            ..FakeState::default()
        }));
        let shared = Arc::clone(&state);
        thread::spawn(move || {
            for stream in listener.incoming() {
                let stream = match stream {
                    Ok(s) => s,
                    Err(_) => return,
                };
                let mut writer = stream.try_clone().unwrap();
                let reader = BufReader::new(stream);
                for line in reader.lines() {
                    let line = match line {
                        Ok(l) => l,
                        Err(_) => break,
                    };
                    let line = line.trim_end_matches('\r').to_owned();
                    if let Some(reply) = answer(&shared, &line) {
                        let truncate = shared.lock().unwrap().truncate_replies;
                        if truncate {
                            writer.write_all(reply.as_bytes()).unwrap();
                        } else {
                            writer.write_all(format!("{}\r\n", reply).as_bytes()).unwrap();
                        }
                        writer.flush().unwrap();
                    }
                }
            }
        });
        FakeSupply { addr, state }
    }

    fn connect(&self) -> PowerSupply {
        PowerSupply::open(&SupplyConfig {
            host: Some(self.addr.clone()),
            timeout: Duration::from_millis(200),
            ..SupplyConfig::default()
        })
        .unwrap()
    }

    fn preset(&self, channel: Option<u8>, parameter: &str, value: &str) {
        self.state
            .lock()
            .unwrap()
            .params
            .insert((channel, parameter.to_owned()), value.to_owned());
    }

    fn stored(&self, channel: Option<u8>, parameter: &str) -> Option<String> {
        self.state
            .lock()
            .unwrap()
            .params
            .get(&(channel, parameter.to_owned()))
            .cloned()
    }

    fn script_stat(&self, words: &[u16]) {
        let mut state = self.state.lock().unwrap();
        state.stat_script = words.iter().copied().collect();
    }

    fn set_default_stat(&self, word: u16) {
        self.state.lock().unwrap().default_stat = word;
    }

    fn requests(&self) -> Vec<String> {
        self.state.lock().unwrap().requests.clone()
    }
}

fn fields(line: &str) -> HashMap<String, String> {
    line.trim_start_matches('$')
        .split(',')
        .filter_map(|field| {
            field
                .split_once(':')
                .map(|(k, v)| (k.to_owned(), v.to_owned()))
        })
        .collect()
}

fn monitor_default(parameter: &str) -> &'static str {
    match parameter {
        "RUP" | "RDW" => "50",
        "POL" => "+",
        "BDNAME" => "DT1471ET",
        "BDSNUM" => "123456",
        _ => "0",
    }
}

fn answer(state: &Arc<Mutex<FakeState>>, line: &str) -> Option<String> {
    let mut state = state.lock().unwrap();
    state.requests.push(line.to_owned());

    let fields = fields(line);
    // absent boards answer with silence
    if fields.get("BD").map(String::as_str) != Some("0") {
        return None;
    }
    let channel = fields.get("CH").and_then(|ch| ch.parse::<u8>().ok());
    let parameter = fields.get("PAR").cloned().unwrap_or_default();

    match fields.get("CMD").map(String::as_str) {
        Some("MON") if parameter == "STAT" => {
            let word = state
                .stat_script
                .pop_front()
                .unwrap_or(state.default_stat);
            Some(format!("#BD:00,CMD:OK,VAL:{}", word))
        }
        Some("MON") => {
            let value = state
                .params
                .get(&(channel, parameter.clone()))
                .cloned()
                .unwrap_or_else(|| monitor_default(&parameter).to_owned());
            Some(format!("#BD:00,CMD:OK,VAL:{}", value))
        }
        Some("SET") => {
            if let Some(value) = fields.get("VAL") {
                state.params.insert((channel, parameter), value.clone());
            }
            Some("#BD:00,CMD:OK".to_owned())
        }
        _ => Some("#BD:00,CMD:ERR".to_owned()),
    }
}

#[test]
fn set_and_read_back_channel_parameters() {
    let fake = FakeSupply::start();
    let mut supply = fake.connect();
    let mut ch = supply.channel(2);

    ch.set_vset(12.5).unwrap();
    assert_eq!(fake.stored(Some(2), "VSET").as_deref(), Some("12.5"));
    assert_eq!(ch.vset().unwrap(), 12.5);
}

#[test]
fn board_identity_is_cached() {
    let fake = FakeSupply::start();
    let mut supply = fake.connect();

    assert_eq!(supply.model_name().unwrap(), "DT1471ET");
    assert_eq!(supply.serial_number().unwrap(), "123456");
    let after_first = fake.requests().len();

    // second round served from the cache, no wire traffic
    assert_eq!(supply.model_name().unwrap(), "DT1471ET");
    assert_eq!(supply.serial_number().unwrap(), "123456");
    assert_eq!(fake.requests().len(), after_first);
}

#[test]
fn absent_board_silence_is_a_device_error() {
    let fake = FakeSupply::start();
    let mut supply = fake.connect();

    let result = supply.channel_on_board(1, 0).vset();
    assert_matches!(result, Err(CaenError::Device(_)));
}

#[test]
fn missing_board_id_without_default_board() {
    let fake = FakeSupply::start();
    let mut supply = PowerSupply::open(&SupplyConfig {
        host: Some(fake.addr.clone()),
        default_board: false,
        timeout: Duration::from_millis(200),
        ..SupplyConfig::default()
    })
    .unwrap();

    assert_matches!(supply.channel(0).vset(), Err(CaenError::Configuration(_)));
    // the explicit form still works
    assert_eq!(supply.channel_on_board(0, 0).vset().unwrap(), 0.0);
}

#[test]
fn vmon_carries_the_polarity_sign() {
    let fake = FakeSupply::start();
    fake.preset(Some(0), "POL", "-");
    fake.preset(Some(0), "VMON", "55.4");
    fake.preset(Some(1), "VMON", "55.4");
    let mut supply = fake.connect();

    assert_eq!(supply.channel(0).vmon().unwrap(), -55.4);
    // channel 1 keeps the default positive polarity
    assert_eq!(supply.channel(1).vmon().unwrap(), 55.4);
}

#[test]
fn garbled_polarity_is_rejected() {
    let fake = FakeSupply::start();
    fake.preset(Some(0), "POL", "x");
    let mut supply = fake.connect();

    assert_matches!(
        supply.channel(0).polarity(),
        Err(CaenError::UnexpectedPolarity(_))
    );
}

#[test]
fn currents_are_converted_between_amps_and_wire_units() {
    let fake = FakeSupply::start();
    fake.preset(Some(0), "IMON", "2.5");
    let mut supply = fake.connect();
    let mut ch = supply.channel(0);

    // the wire carries microamps
    assert!((ch.imon().unwrap() - 2.5e-6).abs() < 1e-15);

    ch.set_current_compliance(5e-6).unwrap();
    assert_eq!(fake.stored(Some(0), "ISET").as_deref(), Some("5"));
    assert!((ch.iset().unwrap() - 5e-6).abs() < 1e-15);
}

#[test]
fn status_word_decodes_into_flags() {
    let fake = FakeSupply::start();
    fake.script_stat(&[0b1001]);
    let mut supply = fake.connect();

    let status = supply.channel(0).status().unwrap();
    assert!(status.contains(ChannelStatus::OUTPUT_ON));
    assert!(status.contains(ChannelStatus::OVERCURRENT));
    assert!(!status.is_ramping());
}

#[test]
fn output_switch_commands_are_valueless_sets() {
    let fake = FakeSupply::start();
    let mut supply = fake.connect();
    let mut ch = supply.channel(3);

    ch.turn_on().unwrap();
    ch.turn_off().unwrap();

    let requests = fake.requests();
    assert_eq!(requests[0], "$BD:0,CMD:SET,CH:3,PAR:ON");
    assert_eq!(requests[1], "$BD:0,CMD:SET,CH:3,PAR:OFF");
}

#[test]
fn ramp_completes_and_restores_ramp_rates() {
    let fake = FakeSupply::start();
    // one poll mid-ramp, then settled
    fake.script_stat(&[0b0011, 0b0001]);
    let mut supply = fake.connect();
    let mut ch = supply.channel(0);

    let options = RampOptions {
        rate: 1000.0,
        timeout: Duration::from_secs(5),
    };
    ch.ramp_voltage(10.0, &options).unwrap();

    assert_eq!(fake.stored(Some(0), "VSET").as_deref(), Some("10"));
    // the transient 1000 V/s configuration was rolled back
    assert_eq!(fake.stored(Some(0), "RUP").as_deref(), Some("50"));
    assert_eq!(fake.stored(Some(0), "RDW").as_deref(), Some("50"));
}

#[test]
fn stuck_ramp_times_out_and_still_restores() {
    let fake = FakeSupply::start();
    fake.set_default_stat(0b0011); // reports ramping forever
    let mut supply = fake.connect();
    let mut ch = supply.channel(0);

    let options = RampOptions {
        rate: 1000.0,
        timeout: Duration::from_millis(10),
    };
    assert_matches!(
        ch.ramp_voltage(10.0, &options),
        Err(CaenError::RampTimeout { .. })
    );
    assert_eq!(fake.stored(Some(0), "RUP").as_deref(), Some("50"));
    assert_eq!(fake.stored(Some(0), "RDW").as_deref(), Some("50"));
}

#[test]
fn nonpositive_ramp_rate_is_rejected_before_any_traffic() {
    let fake = FakeSupply::start();
    let mut supply = fake.connect();

    let options = RampOptions {
        rate: 0.0,
        ..RampOptions::default()
    };
    assert_matches!(
        supply.channel(0).ramp_voltage(10.0, &options),
        Err(CaenError::Configuration(_))
    );
    assert!(fake.requests().is_empty());
}

#[test]
fn partial_reply_is_a_communication_timeout() {
    let fake = FakeSupply::start();
    fake.state.lock().unwrap().truncate_replies = true;
    let mut supply = fake.connect();

    assert_matches!(
        supply.channel(0).vset(),
        Err(CaenError::CommunicationTimeout(_))
    );
}

#[test]
fn opening_needs_exactly_one_endpoint() {
    assert_matches!(
        PowerSupply::open(&SupplyConfig::default()),
        Err(CaenError::Configuration(_))
    );
    assert_matches!(
        PowerSupply::open(&SupplyConfig {
            port: Some("/dev/ttyACM0".into()),
            host: Some("192.168.0.1".into()),
            ..SupplyConfig::default()
        }),
        Err(CaenError::Configuration(_))
    );
}
