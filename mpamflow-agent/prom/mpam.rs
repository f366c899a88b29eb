// MPAM state exporter
// Publishes per-MSC state, reconciled class capabilities and error counts

use prometheus::{Gauge, GaugeVec, Registry};
use std::collections::HashMap;
use std::sync::Arc;

use crate::error::{MpamError, Result};
use crate::metrics::mpam::{ClassMetric, DeviceMetric, SystemMetric};
use crate::msc::error_irq::error_code_name;
use crate::orchestrator::Mpam;
use crate::topology::{ClassHandle, DeviceHandle, Topology};

pub struct MpamMetricExporter {
    mpam: Mpam,
    topology: Arc<Topology>,
    registry: Arc<Registry>,
    device_gauges: HashMap<DeviceMetric, HashMap<DeviceHandle, Gauge>>,
    class_gauges: HashMap<ClassMetric, HashMap<ClassHandle, Gauge>>,
    system_gauges: HashMap<SystemMetric, Gauge>,
    error_gauges: GaugeVec,
}

impl MpamMetricExporter {
    /// Exporter for a context whose discovery has completed
    pub fn new(mpam: Mpam) -> Result<Self> {
        let topology = mpam
            .topology()
            .ok_or_else(|| MpamError::NotFound("no discovered topology to export".into()))?;
        let registry = Arc::new(Registry::new());
        let error_gauges = GaugeVec::new(
            prometheus::Opts::new(
                "mpam_msc_errors",
                "Hardware-signalled MSC errors by error code",
            ),
            &["msc", "code"],
        )?;
        registry.register(Box::new(error_gauges.clone()))?;

        let mut exporter = Self {
            mpam,
            topology,
            registry,
            device_gauges: HashMap::new(),
            class_gauges: HashMap::new(),
            system_gauges: HashMap::new(),
            error_gauges,
        };

        exporter.register_metrics()?;

        Ok(exporter)
    }

    fn register_metrics(&mut self) -> Result<()> {
        for &metric in DeviceMetric::ALL {
            let opts = prometheus::Opts::new(metric.name(), metric.help());

            let mut device_map = HashMap::new();
            for device in self.topology.devices() {
                let class = self.topology.class(device.class());
                let gauge = Gauge::with_opts(
                    opts.clone()
                        .const_label("msc", device.handle().to_string())
                        .const_label("class", class.label())
                        .const_label("base", format!("0x{:x}", device.base_address())),
                )?;
                self.registry.register(Box::new(gauge.clone()))?;
                device_map.insert(device.handle(), gauge);
            }
            self.device_gauges.insert(metric, device_map);
        }

        for &metric in ClassMetric::ALL {
            let opts = prometheus::Opts::new(metric.name(), metric.help());

            let mut class_map = HashMap::new();
            for class in self.topology.classes() {
                let gauge = Gauge::with_opts(opts.clone().const_label("class", class.label()))?;
                self.registry.register(Box::new(gauge.clone()))?;
                class_map.insert(class.handle(), gauge);
            }
            self.class_gauges.insert(metric, class_map);
        }

        for &metric in SystemMetric::ALL {
            let gauge = Gauge::new(metric.name(), metric.help())?;
            self.registry.register(Box::new(gauge.clone()))?;
            self.system_gauges.insert(metric, gauge);
        }

        Ok(())
    }

    pub fn registry(&self) -> &Registry {
        &self.registry
    }

    fn set_device(&self, metric: DeviceMetric, device: DeviceHandle, value: f64) {
        if let Some(gauge) = self
            .device_gauges
            .get(&metric)
            .and_then(|m| m.get(&device))
        {
            gauge.set(value);
        }
    }

    fn set_system(&self, metric: SystemMetric, value: f64) {
        if let Some(gauge) = self.system_gauges.get(&metric) {
            gauge.set(value);
        }
    }

    /// Collect metrics once (called by the supervisor)
    pub async fn collect(&self) {
        for device in self.topology.devices() {
            let (probed, online, irq) = {
                let state = device.lock();
                (
                    state.probed,
                    state.online_affinity.weight(),
                    state.enable_error_irq,
                )
            };
            let handle = device.handle();
            self.set_device(DeviceMetric::Probed, handle, f64::from(u8::from(probed)));
            self.set_device(DeviceMetric::OnlineCpus, handle, f64::from(online));
            self.set_device(DeviceMetric::ErrorIrqEnabled, handle, f64::from(u8::from(irq)));
        }

        for class in self.topology.classes() {
            let Some(props) = class.props() else {
                continue;
            };
            for (metric, gauges) in &self.class_gauges {
                if let Some(gauge) = gauges.get(&class.handle()) {
                    gauge.set(metric.value(&props));
                }
            }
        }

        for ((device, code), count) in self.mpam.error_stats().snapshot() {
            self.error_gauges
                .with_label_values(&[&device.to_string(), &error_code_name(code)])
                .set(count as f64);
        }

        let sysprops = self.topology.sysprops();
        self.set_system(SystemMetric::Enabled, f64::from(u8::from(self.mpam.is_enabled())));
        self.set_system(SystemMetric::MaxPartid, f64::from(sysprops.max_partid));
        self.set_system(SystemMetric::MaxPmg, f64::from(sysprops.max_pmg));
        self.set_system(SystemMetric::LlcSize, sysprops.llc_size as f64);
        self.set_system(
            SystemMetric::OnlineCpus,
            f64::from(self.mpam.online_cpus().weight()),
        );
        if let Some(executors) = self.mpam.executors() {
            self.set_system(SystemMetric::RemoteCalls, executors.remote_calls() as f64);
        }
    }
}
