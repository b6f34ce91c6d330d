use crate::mqtt::MqttPublisher;
use rand::Rng;
use serde::Serialize;
use std::time::Duration;

#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct SimulatedReading {
    pub temperature: f64,
    pub humidity: f64,
}

/// Temperature in [15, 30) °C, humidity in [20, 80) %.
pub fn simulate_reading<R: Rng>(rng: &mut R) -> SimulatedReading {
    SimulatedReading {
        temperature: rng.gen_range(15.0..30.0),
        humidity: rng.gen_range(20.0..80.0),
    }
}

/// Publishes a simulated reading to `topic` every `interval`, forever.
pub async fn run_generator(publisher: MqttPublisher, topic: String, interval: Duration) {
    let mut ticker = tokio::time::interval(interval);
    loop {
        ticker.tick().await;
        let reading = simulate_reading(&mut rand::thread_rng());
        match publisher.publish_json(&topic, &reading).await {
            Ok(()) => tracing::debug!(
                temperature = reading.temperature,
                humidity = reading.humidity,
                "published simulated reading"
            ),
            Err(err) => tracing::warn!(error=%err, topic=%topic, "failed to publish simulated reading"),
        }
    }
}
