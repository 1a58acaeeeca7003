// weather_exporter - Prometheus metrics exporter for Netatmo and OpenWeather
//
// Copyright 2022 Nick Pillitteri
//
// This program is free software: you can redistribute it and/or modify
// it under the terms of the GNU General Public License as published by
// the Free Software Foundation, either version 3 of the License, or
// (at your option) any later version.
//
// This program is distributed in the hope that it will be useful,
// but WITHOUT ANY WARRANTY; without even the implied warranty of
// MERCHANTABILITY or FITNESS FOR A PARTICULAR PURPOSE.  See the
// GNU General Public License for more details.
//
// You should have received a copy of the GNU General Public License
// along with this program.  If not, see <http://www.gnu.org/licenses/>.
//

use crate::metrics::{Descriptor, GaugeTable, MetricSpec, MetricsRegistry, RegistrationError, Sample};
use crate::netatmo::{
    IndoorModuleData, ModuleData, NetatmoClient, OutdoorModuleData, StationsDataResponse, TokenSource, WindModuleData,
};
use crate::scheduler::Updater;
use std::time::Instant;
use tracing::{Instrument, Level};

const NAMESPACE: &str = "netatmo";

const STATION_LABELS: &[&str] = &["home_id", "home_name", "id", "type", "station_name"];
const MODULE_LABELS: &[&str] = &["home_id", "home_name", "id", "type", "module_name"];

fn indoor_specs() -> Vec<MetricSpec<IndoorModuleData>> {
    const SUBSYSTEM: &str = "indoor_module";
    vec![
        MetricSpec {
            subsystem: SUBSYSTEM,
            name: "absolute_pressure",
            help: "Absolute pressure in millibars",
            value: |d: &IndoorModuleData| d.absolute_pressure,
        },
        MetricSpec {
            subsystem: SUBSYSTEM,
            name: "co2",
            help: "CO2 level in ppm",
            value: |d: &IndoorModuleData| d.co2,
        },
        MetricSpec {
            subsystem: SUBSYSTEM,
            name: "humidity",
            help: "Relative humidity (0-100)",
            value: |d: &IndoorModuleData| d.humidity,
        },
        MetricSpec {
            subsystem: SUBSYSTEM,
            name: "noise",
            help: "Noise level in dB",
            value: |d: &IndoorModuleData| d.noise,
        },
        MetricSpec {
            subsystem: SUBSYSTEM,
            name: "pressure",
            help: "Pressure at sea level in millibars",
            value: |d: &IndoorModuleData| d.pressure,
        },
        MetricSpec {
            subsystem: SUBSYSTEM,
            name: "temperature",
            help: "Temperature in celsius",
            value: |d: &IndoorModuleData| d.temperature,
        },
    ]
}

fn outdoor_specs() -> Vec<MetricSpec<OutdoorModuleData>> {
    const SUBSYSTEM: &str = "outdoor_module";
    vec![
        MetricSpec {
            subsystem: SUBSYSTEM,
            name: "humidity",
            help: "Relative humidity (0-100)",
            value: |d: &OutdoorModuleData| d.humidity,
        },
        MetricSpec {
            subsystem: SUBSYSTEM,
            name: "temperature",
            help: "Temperature in celsius",
            value: |d: &OutdoorModuleData| d.temperature,
        },
    ]
}

fn wind_specs() -> Vec<MetricSpec<WindModuleData>> {
    const SUBSYSTEM: &str = "wind_module";
    vec![
        MetricSpec {
            subsystem: SUBSYSTEM,
            name: "gust_angle",
            help: "Direction of the last 5 minutes highest gust in degrees",
            value: |d: &WindModuleData| d.gust_angle,
        },
        MetricSpec {
            subsystem: SUBSYSTEM,
            name: "gust_strength",
            help: "Speed of the last 5 minutes highest gust in km/h",
            value: |d: &WindModuleData| d.gust_strength,
        },
        MetricSpec {
            subsystem: SUBSYSTEM,
            name: "wind_angle",
            help: "Wind direction in degrees",
            value: |d: &WindModuleData| d.wind_angle,
        },
        MetricSpec {
            subsystem: SUBSYSTEM,
            name: "wind_strength",
            help: "Wind speed in km/h",
            value: |d: &WindModuleData| d.wind_strength,
        },
    ]
}

/// Gauges for every station (indoor module) and outdoor or wind module of a Netatmo account.
///
/// Metrics are prefixed with `netatmo_indoor_module_`, `netatmo_outdoor_module_`, or
/// `netatmo_wind_module_`. Station gauges are labeled with `station_name`, module gauges
/// with `module_name`, and both with `home_id`, `home_name`, `id`, and `type`.
#[derive(Debug)]
pub struct StationsData<T> {
    client: NetatmoClient<T>,
    indoor: GaugeTable<IndoorModuleData>,
    outdoor: GaugeTable<OutdoorModuleData>,
    wind: GaugeTable<WindModuleData>,
}

impl<T> StationsData<T>
where
    T: TokenSource,
{
    pub fn new(client: NetatmoClient<T>) -> Self {
        Self {
            client,
            indoor: GaugeTable::new(NAMESPACE, STATION_LABELS, indoor_specs()),
            outdoor: GaugeTable::new(NAMESPACE, MODULE_LABELS, outdoor_specs()),
            wind: GaugeTable::new(NAMESPACE, MODULE_LABELS, wind_specs()),
        }
    }

    /// Register every gauge with `reg`. Nothing is registered if any name is already taken.
    pub fn register(&self, reg: &mut MetricsRegistry) -> Result<(), RegistrationError> {
        reg.register(
            self.indoor
                .families()
                .chain(self.outdoor.families())
                .chain(self.wind.families()),
        )
    }

    pub fn describe(&self) -> Vec<Descriptor> {
        let mut out = self.indoor.describe();
        out.extend(self.outdoor.describe());
        out.extend(self.wind.describe());
        out
    }

    pub fn collect(&self) -> Vec<Sample> {
        let mut out = self.indoor.collect();
        out.extend(self.outdoor.collect());
        out.extend(self.wind.collect());
        out
    }

    /// Set gauges from every device and supported module in `res`, returning the number of
    /// series written. Modules of unsupported types are skipped.
    pub fn apply(&self, res: &StationsDataResponse) -> usize {
        let mut written = 0;

        for device in res.body.devices.iter() {
            let station = [
                device.home_id.as_str(),
                device.home_name.as_str(),
                device.id.as_str(),
                device.type_.as_str(),
                device.station_name.as_str(),
            ];

            written += self.indoor.observe(&station, &device.dashboard_data);
            tracing::debug!(
                message = "processed device dashboard data",
                device_type = %device.type_,
                station = %device.station_name,
                id = %device.id,
            );

            for module in device.modules.iter() {
                let labels = [
                    device.home_id.as_str(),
                    device.home_name.as_str(),
                    module.id.as_str(),
                    module.type_.as_str(),
                    module.module_name.as_str(),
                ];

                written += match module.data() {
                    ModuleData::Outdoor(data) => self.outdoor.observe(&labels, data),
                    ModuleData::Wind(data) => self.wind.observe(&labels, data),
                    ModuleData::Unsupported(kind) => {
                        tracing::info!(
                            message = "skipping unsupported module type",
                            module_type = %kind,
                            module = %module.module_name,
                            id = %module.id,
                        );
                        continue;
                    }
                };

                tracing::debug!(
                    message = "processed module dashboard data",
                    module_type = %module.type_,
                    module = %module.module_name,
                    id = %module.id,
                );
            }
        }

        written
    }
}

impl<T> Updater for StationsData<T>
where
    T: TokenSource,
{
    fn name(&self) -> &'static str {
        "netatmo_stations_data"
    }

    async fn update(&self) {
        let start = Instant::now();

        match self
            .client
            .stations_data()
            .instrument(tracing::span!(Level::DEBUG, "netatmo_stations_data"))
            .await
        {
            Ok(res) => {
                let written = self.apply(&res);
                tracing::info!(
                    message = "updated stations data",
                    devices = res.body.devices.len(),
                    series = written,
                    elapsed_ms = start.elapsed().as_millis() as u64,
                );
            }
            Err(e) => {
                tracing::error!(
                    message = "failed to fetch stations data",
                    error = %e,
                    elapsed_ms = start.elapsed().as_millis() as u64,
                );
            }
        }
    }
}
