use std::{thread, time};

fn main() {
    svcrun::handle("beacon", "Beacon Service", || {
        let mut i: u64 = 0;
        loop {
            i += 1;
            tracing::info!("beacon tick {i}");
            thread::sleep(time::Duration::from_secs(1));
        }
    });
}
