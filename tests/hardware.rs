//! Tests that talk to real instruments on the bench.
//!
//! These are ignored unless the crate is tested with the `hardware_tests`
//! feature. The power supply endpoint comes from `CAEN_HV_PORT` (serial
//! device node) or `CAEN_HV_HOST` (ethernet address); with neither set the
//! supply tests exit quietly. The digitizer tests additionally need the
//! `hardware` feature so the vendor library is linked in.

#[cfg(test)]
mod hardware {
    use caenkit::PowerSupply;
    use serial_test::serial;
    use std::env;

    fn open_supply() -> Option<PowerSupply> {
        if let Ok(port) = env::var("CAEN_HV_PORT") {
            return Some(PowerSupply::open_serial(&port).unwrap());
        }
        if let Ok(host) = env::var("CAEN_HV_HOST") {
            return Some(PowerSupply::open_tcp(&host).unwrap());
        }
        // no instrument specified; but that's not an error
        // exit quietly
        println!("No power supply specified; exiting...");
        None
    }

    #[test]
    #[serial]
    #[cfg_attr(not(feature = "hardware_tests"), ignore)]
    fn supply_identity() {
        println!("\nRunning supply_identity");

        let mut supply = match open_supply() {
            Some(s) => s,
            None => return,
        };

        match supply.model_name() {
            Ok(name) => {
                println!("Connected to a {}", name);
            }
            Err(err) => {
                panic!("Could not read board name: {}", err);
            }
        }
        println!("Serial number: {}", supply.serial_number().unwrap());
    }

    #[test]
    #[serial]
    #[cfg_attr(not(feature = "hardware_tests"), ignore)]
    fn supply_channel_readings() {
        println!("\nRunning supply_channel_readings");

        let mut supply = match open_supply() {
            Some(s) => s,
            None => return,
        };
        let mut ch = supply.channel(0);

        println!("VSET = {} V", ch.vset().unwrap());
        println!("VMON = {} V", ch.vmon().unwrap());
        println!("IMON = {} A", ch.imon().unwrap());
        println!("STAT = {:?}", ch.status().unwrap());
    }

    #[test]
    #[serial]
    #[cfg_attr(not(feature = "hardware_tests"), ignore)]
    fn supply_short_ramp() {
        println!("\nRunning supply_short_ramp");

        let mut supply = match open_supply() {
            Some(s) => s,
            None => return,
        };
        let mut ch = supply.channel(0);

        let before = ch.vset().unwrap();
        println!("Ramping from {} V to {} V and back", before, before + 2.0);

        let options = caenkit::RampOptions::default();
        ch.ramp_voltage(before + 2.0, &options).unwrap();
        ch.ramp_voltage(before, &options).unwrap();

        println!("Ramp finished; VMON = {} V", ch.vmon().unwrap());
    }

    #[cfg(feature = "hardware")]
    mod digitizer {
        use caenkit::{Digitizer, Drs4Frequency};
        use serial_test::serial;

        #[test]
        #[serial]
        #[cfg_attr(not(feature = "hardware_tests"), ignore)]
        fn open_digitizer() {
            println!("\nRunning open_digitizer 0");

            match Digitizer::open(0) {
                Ok(mut dgtz) => {
                    println!("Connected to a {}", dgtz.idn().unwrap());
                }
                Err(err) => {
                    panic!("Could not open digitizer: {}", err);
                }
            }
        }

        #[test]
        #[serial]
        #[cfg_attr(not(feature = "hardware_tests"), ignore)]
        fn capture_one_block() {
            println!("\nRunning capture_one_block");

            let mut dgtz = Digitizer::open(0).unwrap();
            dgtz.reset().unwrap();
            dgtz.set_sampling_frequency(Drs4Frequency::Mhz5000).unwrap();
            dgtz.set_record_length(1024).unwrap();
            dgtz.set_max_events_per_transfer(1).unwrap();
            dgtz.enable_channel_groups(true, false).unwrap();
            dgtz.set_fast_trigger_mode(true).unwrap();
            dgtz.set_fast_trigger_digitizing(true).unwrap();
            dgtz.set_post_trigger_size(50).unwrap();

            dgtz.arm().unwrap();
            println!("Status: {:?}", dgtz.acquisition_status().unwrap());

            // best effort: without a trigger source this may be empty
            let events = dgtz.read_waveforms(true, false).unwrap();
            println!("Read {} event(s)", events.len());
            for event in &events {
                for (channel, waveform) in &event.channels {
                    println!("  {}: {} samples", channel, waveform.samples.len());
                }
            }

            dgtz.disarm().unwrap();
        }
    }
}
