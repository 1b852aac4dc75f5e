#[cfg(feature = "defmt")]
use defmt::{debug, error, info, trace, warn};
use embedded_hal_async::{delay::DelayNs, i2c, spi};

use crate::{
    interface::{Interface, SPI_READ, SPI_WRITE_MASK},
    mode::{
        ensure_background, ensure_idle, fifo_entry, pending_command, raw_value,
        BUSY_TIME_FAILSAFE_MS, MAX_BUSY_TIME,
    },
    registers::{
        IrqStatus, MeasCfg, ProductId, Register, CFG_REG_ADDR, COEFFICIENT_BLOCK_LEN,
        SPI_3WIRE_ENABLE, TEMPERATURE_ERRATUM_PATCH,
    },
    Block, CalibrationCoefficients, ContResults, Continuous, Dps310, Dps310Error, Field,
    I2cInterface, InterruptStatus, IrqSources, Measurement, MeasurementRate, OperatingMode,
    Oversampling, Pressure, Quantity, SensorConfig, SensorStatus, SpiInterface,
    ThermodynamicTemperature, MAX_LOOPS,
};

pub(crate) trait AsyncInterface: Interface {
    type Error;
    async fn write_byte(&mut self, address: u8, value: u8) -> Result<(), Self::Error>;
    async fn read_block(&mut self, address: u8, buffer: &mut [u8]) -> Result<(), Self::Error>;

    async fn read_byte(&mut self, address: u8) -> Result<u8, Self::Error> {
        let mut data = [0u8; 1];
        self.read_block(address, &mut data).await?;
        Ok(data[0])
    }
}

impl<I2C, E> AsyncInterface for I2cInterface<I2C>
where
    I2C: i2c::I2c<Error = E>,
{
    type Error = E;

    async fn write_byte(&mut self, address: u8, value: u8) -> Result<(), Self::Error> {
        #[cfg(feature = "defmt")]
        {
            trace!("I2C Write to {:#x}: {=u8:#x}", address, value);
        }
        self.i2c.write(self.address, &[address, value]).await
    }

    async fn read_block(&mut self, address: u8, buffer: &mut [u8]) -> Result<(), Self::Error> {
        self.i2c.write_read(self.address, &[address], buffer).await?;
        #[cfg(feature = "defmt")]
        {
            trace!("I2C Read from {:#x}: {=[u8]:#x}", address, buffer);
        }
        Ok(())
    }
}

impl<SPI, E> AsyncInterface for SpiInterface<SPI>
where
    SPI: spi::SpiDevice<Error = E>,
{
    type Error = E;

    async fn write_byte(&mut self, address: u8, value: u8) -> Result<(), Self::Error> {
        #[cfg(feature = "defmt")]
        {
            trace!("SPI Write to {:#x}: {=u8:#x}", address, value);
        }
        self.spi.write(&[address & SPI_WRITE_MASK, value]).await
    }

    async fn read_block(&mut self, address: u8, buffer: &mut [u8]) -> Result<(), Self::Error> {
        self.spi
            .transaction(&mut [
                spi::Operation::Write(&[address | SPI_READ]),
                spi::Operation::Read(buffer),
            ])
            .await?;
        #[cfg(feature = "defmt")]
        {
            trace!("SPI Read from {:#x}: {=[u8]:#x}", address, buffer);
        }
        Ok(())
    }
}

pub(crate) trait AsyncRegister<IFACE>
where
    IFACE: AsyncInterface,
    Self: Register + Sized,
{
    async fn read_register(iface: &mut IFACE) -> Result<Self, IFACE::Error> {
        Ok(Self::from_u8(iface.read_byte(Self::ADDRESS).await?))
    }
}

macro_rules! impl_async_register {
    ($($reg:ty),+) => {
        $(
            impl<IFACE> AsyncRegister<IFACE> for $reg
            where
                IFACE: AsyncInterface,
            {}
        )+
    };
}

impl_async_register! {MeasCfg, IrqStatus}

async fn read_field<IFACE: AsyncInterface>(
    iface: &mut IFACE,
    field: Field,
) -> Result<u8, IFACE::Error> {
    let bf = field.bitfield();
    Ok(bf.extract(iface.read_byte(bf.address).await?))
}

async fn write_field<IFACE: AsyncInterface>(
    iface: &mut IFACE,
    field: Field,
    value: u8,
) -> Result<(), Dps310Error<IFACE::Error>> {
    let bf = field.bitfield();
    if !bf.writable() {
        return Err(Dps310Error::ReadOnlyField(field));
    }
    let current = iface.read_byte(bf.address).await?;
    iface
        .write_byte(bf.address, bf.insert(current, value))
        .await?;
    Ok(())
}

async fn read_raw<IFACE: AsyncInterface>(
    iface: &mut IFACE,
    block: Block,
) -> Result<i32, IFACE::Error> {
    let mut buf = [0u8; 3];
    iface.read_block(block.address(), &mut buf).await?;
    Ok(raw_value(&buf))
}

/// Asynchronous functions for the DPS310 sensor.
///
/// Same semantics as the blocking `SyncFunctions`.
#[allow(async_fn_in_trait)]
pub trait AsyncFunctions<I, E, D> {
    /// Identify the sensor, load the calibration coefficients, apply the
    /// configuration and seed the temperature used for pressure compensation.
    ///
    /// Any failure permanently disables the driver.
    async fn init(&mut self) -> Result<(), Dps310Error<E>>;

    /// Read the readiness flags from MEAS_CFG.
    async fn sensor_status(&mut self) -> Result<SensorStatus, Dps310Error<E>>;

    /// Set temperature measurement rate and oversampling.
    async fn config_temperature(
        &mut self,
        rate: MeasurementRate,
        oversampling: Oversampling,
    ) -> Result<(), Dps310Error<E>>;

    /// Set pressure measurement rate and oversampling.
    async fn config_pressure(
        &mut self,
        rate: MeasurementRate,
        oversampling: Oversampling,
    ) -> Result<(), Dps310Error<E>>;

    /// Start a single temperature measurement.
    async fn measure_temp_once(&mut self) -> Result<(), Dps310Error<E>>;

    /// Start a single pressure measurement.
    async fn measure_pressure_once(&mut self) -> Result<(), Dps310Error<E>>;

    /// Collect the result of a pending single measurement.
    async fn get_single_result(&mut self) -> Result<Measurement, Dps310Error<E>>;

    /// Measure temperature once, waiting for the conversion to finish.
    async fn sample_temperature(&mut self) -> Result<ThermodynamicTemperature, Dps310Error<E>>;

    /// Measure pressure once, waiting for the conversion to finish.
    async fn sample_pressure(&mut self) -> Result<Pressure, Dps310Error<E>>;

    /// Start background measurement into the FIFO.
    async fn start_continuous(&mut self, what: Continuous) -> Result<(), Dps310Error<E>>;

    /// Drain the FIFO into the given buffers.
    ///
    /// The drain gives up after 100 entries even if the FIFO still reports
    /// data; the FIFO itself holds at most 32.
    async fn get_cont_results(
        &mut self,
        temperature: &mut [ThermodynamicTemperature],
        pressure: &mut [Pressure],
    ) -> Result<ContResults, Dps310Error<E>>;

    /// Stop any measurement, flush and disable the FIFO.
    async fn standby(&mut self) -> Result<(), Dps310Error<E>>;

    /// Set the interrupt pin polarity. Not available on 4-wire SPI.
    async fn set_interrupt_polarity(&mut self, active_high: bool) -> Result<(), Dps310Error<E>>;

    /// Select the interrupt sources. Not available on 4-wire SPI.
    async fn set_interrupt_sources(&mut self, sources: IrqSources)
        -> Result<(), Dps310Error<E>>;

    /// Read and clear the interrupt flags.
    async fn interrupt_status(&mut self) -> Result<InterruptStatus, Dps310Error<E>>;

    /// Whether the FIFO is full.
    async fn fifo_full(&mut self) -> Result<bool, Dps310Error<E>>;
}

trait AsyncSteps<E> {
    async fn run_init(&mut self) -> Result<(), Dps310Error<E>>;
    async fn identify_and_calibrate(&mut self) -> Result<(), Dps310Error<E>>;
    async fn set_op_mode(&mut self, mode: OperatingMode) -> Result<(), Dps310Error<E>>;
    async fn write_settings(
        &mut self,
        quantity: Quantity,
        settings: SensorConfig,
    ) -> Result<(), Dps310Error<E>>;
    async fn configure(
        &mut self,
        quantity: Quantity,
        settings: SensorConfig,
    ) -> Result<(), Dps310Error<E>>;
    async fn measure_once(&mut self, quantity: Quantity) -> Result<(), Dps310Error<E>>;
    async fn read_single(&mut self, quantity: Quantity) -> Result<i32, Dps310Error<E>>;
    async fn sample(&mut self, quantity: Quantity) -> Result<i32, Dps310Error<E>>;
}

impl<IFACE, E, D> AsyncSteps<E> for Dps310<IFACE, D>
where
    IFACE: AsyncInterface<Error = E>,
    D: DelayNs,
{
    async fn run_init(&mut self) -> Result<(), Dps310Error<E>> {
        self.identify_and_calibrate().await?;
        self.standby().await?;
        let config = self.config;
        self.config_temperature(config.temperature.rate, config.temperature.oversampling)
            .await?;
        self.config_pressure(config.pressure.rate, config.pressure.oversampling)
            .await?;
        if self.iface.supports_interrupts() {
            if let Some(active_high) = config.irq_active_high {
                self.set_interrupt_polarity(active_high).await?;
            }
            if let Some(sources) = config.irq_sources {
                self.set_interrupt_sources(sources).await?;
            }
        }
        self.sample_temperature().await?;
        self.standby().await?;
        for (address, value) in TEMPERATURE_ERRATUM_PATCH {
            self.iface.write_byte(address, value).await?;
        }
        self.sample_temperature().await?;
        Ok(())
    }

    async fn identify_and_calibrate(&mut self) -> Result<(), Dps310Error<E>> {
        if self.iface.three_wire() {
            self.iface
                .write_byte(CFG_REG_ADDR, SPI_3WIRE_ENABLE)
                .await?;
        }
        let product = ProductId(read_field(&mut self.iface, Field::ProductId).await?);
        if !product.validate() {
            return Err(Dps310Error::InvalidDevice);
        }
        self.product_id = product.0;
        self.revision_id = read_field(&mut self.iface, Field::RevisionId).await?;
        #[cfg(feature = "defmt")]
        {
            info!("DPS310 revision {}", self.revision_id);
        }
        let source = read_field(&mut self.iface, Field::CoefficientSource).await?;
        write_field(&mut self.iface, Field::TemperatureSource, source).await?;

        let mut coeffs_buf = [0u8; COEFFICIENT_BLOCK_LEN];
        self.iface
            .read_block(Block::Coefficients.address(), &mut coeffs_buf)
            .await?;
        let coefficients = CalibrationCoefficients::from_registers(&coeffs_buf);
        #[cfg(feature = "defmt")]
        {
            debug!("Coefficients: {}", coefficients);
        }
        self.coefficients = Some(coefficients);
        Ok(())
    }

    async fn set_op_mode(&mut self, mode: OperatingMode) -> Result<(), Dps310Error<E>> {
        write_field(&mut self.iface, Field::OpMode, mode.opcode()).await?;
        #[cfg(feature = "defmt")]
        {
            debug!("Operating mode {} -> {}", self.mode, mode);
        }
        self.mode = mode;
        Ok(())
    }

    async fn write_settings(
        &mut self,
        quantity: Quantity,
        settings: SensorConfig,
    ) -> Result<(), Dps310Error<E>> {
        let (rate, oversampling, shift) = match quantity {
            Quantity::Temperature => (
                Field::TemperatureRate,
                Field::TemperatureOversampling,
                Field::TemperatureShift,
            ),
            Quantity::Pressure => (
                Field::PressureRate,
                Field::PressureOversampling,
                Field::PressureShift,
            ),
        };
        write_field(&mut self.iface, rate, settings.rate.into_bits()).await?;
        write_field(
            &mut self.iface,
            oversampling,
            settings.oversampling.into_bits(),
        )
        .await?;
        write_field(&mut self.iface, shift, settings.shift_enabled() as u8).await
    }

    async fn configure(
        &mut self,
        quantity: Quantity,
        settings: SensorConfig,
    ) -> Result<(), Dps310Error<E>> {
        self.ready()?;
        let previous = self.settings(quantity);
        match self.write_settings(quantity, settings).await {
            Ok(()) => {
                self.commit(quantity, settings);
                Ok(())
            }
            Err(e) => {
                #[cfg(feature = "defmt")]
                {
                    warn!("Configuring {} failed, restoring {}", quantity, previous);
                }
                if settings != previous {
                    let _ = self.write_settings(quantity, previous).await;
                }
                Err(e)
            }
        }
    }

    async fn measure_once(&mut self, quantity: Quantity) -> Result<(), Dps310Error<E>> {
        self.ready()?;
        ensure_idle(self.mode)?;
        self.set_op_mode(quantity.single_shot()).await
    }

    async fn read_single(&mut self, quantity: Quantity) -> Result<i32, Dps310Error<E>> {
        let (ready, block) = match quantity {
            Quantity::Temperature => (Field::TemperatureReady, Block::Temperature),
            Quantity::Pressure => (Field::PressureReady, Block::Pressure),
        };
        if read_field(&mut self.iface, ready).await? == 0 {
            return Err(Dps310Error::Unfinished);
        }
        // The sensor clears the opcode once the result is available
        self.mode = OperatingMode::Idle;
        Ok(read_raw(&mut self.iface, block).await?)
    }

    async fn sample(&mut self, quantity: Quantity) -> Result<i32, Dps310Error<E>> {
        self.measure_once(quantity).await?;
        let busy = self.settings(quantity).single_shot_busy_time();
        self.delay.delay_us(busy * 100).await;
        self.delay.delay_ms(BUSY_TIME_FAILSAFE_MS).await;
        let result = self.read_single(quantity).await;
        if result.is_err() {
            let _ = self.standby().await;
        }
        result
    }
}

impl<IFACE, E, D> AsyncFunctions<IFACE, E, D> for Dps310<IFACE, D>
where
    IFACE: AsyncInterface<Error = E>,
    D: DelayNs,
{
    async fn init(&mut self) -> Result<(), Dps310Error<E>> {
        if self.init_failed {
            return Err(Dps310Error::InitFailed);
        }
        let result = self.run_init().await;
        if result.is_err() {
            #[cfg(feature = "defmt")]
            {
                error!("DPS310 initialization failed, driver disabled");
            }
            self.init_failed = true;
        }
        result
    }

    async fn sensor_status(&mut self) -> Result<SensorStatus, Dps310Error<E>> {
        if self.init_failed {
            return Err(Dps310Error::InitFailed);
        }
        let status = MeasCfg::read_register(&mut self.iface).await?;
        Ok(SensorStatus {
            coefficients_ready: status.coef_ready(),
            sensor_ready: status.sensor_ready(),
            temperature_ready: status.tmp_ready(),
            pressure_ready: status.prs_ready(),
        })
    }

    async fn config_temperature(
        &mut self,
        rate: MeasurementRate,
        oversampling: Oversampling,
    ) -> Result<(), Dps310Error<E>> {
        self.configure(Quantity::Temperature, SensorConfig::new(rate, oversampling))
            .await
    }

    async fn config_pressure(
        &mut self,
        rate: MeasurementRate,
        oversampling: Oversampling,
    ) -> Result<(), Dps310Error<E>> {
        self.configure(Quantity::Pressure, SensorConfig::new(rate, oversampling))
            .await
    }

    async fn measure_temp_once(&mut self) -> Result<(), Dps310Error<E>> {
        self.measure_once(Quantity::Temperature).await
    }

    async fn measure_pressure_once(&mut self) -> Result<(), Dps310Error<E>> {
        self.measure_once(Quantity::Pressure).await
    }

    async fn get_single_result(&mut self) -> Result<Measurement, Dps310Error<E>> {
        let coefficients = self.ready()?;
        let quantity = pending_command(self.mode)?;
        let raw = self.read_single(quantity).await?;
        Ok(self.compensate(&coefficients, quantity, raw))
    }

    async fn sample_temperature(&mut self) -> Result<ThermodynamicTemperature, Dps310Error<E>> {
        let coefficients = self.ready()?;
        let raw = self.sample(Quantity::Temperature).await?;
        Ok(self.compensate_temperature(&coefficients, raw))
    }

    async fn sample_pressure(&mut self) -> Result<Pressure, Dps310Error<E>> {
        let coefficients = self.ready()?;
        let raw = self.sample(Quantity::Pressure).await?;
        Ok(self.compensate_pressure(&coefficients, raw))
    }

    async fn start_continuous(&mut self, what: Continuous) -> Result<(), Dps310Error<E>> {
        self.ready()?;
        ensure_idle(self.mode)?;
        let mut busy = 0;
        if what.measures_temperature() {
            busy += self.temperature.busy_time();
        }
        if what.measures_pressure() {
            busy += self.pressure.busy_time();
        }
        if busy >= MAX_BUSY_TIME {
            #[cfg(feature = "defmt")]
            {
                warn!("Background measurement needs {} x 0.1 ms per period", busy);
            }
            return Err(Dps310Error::InvalidConfiguration);
        }
        write_field(&mut self.iface, Field::FifoEnable, 1).await?;
        self.set_op_mode(what.mode()).await
    }

    async fn get_cont_results(
        &mut self,
        temperature: &mut [ThermodynamicTemperature],
        pressure: &mut [Pressure],
    ) -> Result<ContResults, Dps310Error<E>> {
        let coefficients = self.ready()?;
        ensure_background(self.mode)?;
        let mut count = ContResults::default();
        for _ in 0..MAX_LOOPS {
            match read_field(&mut self.iface, Field::FifoEmpty).await {
                Ok(0) => {}
                Ok(_) => break,
                Err(_) => {
                    #[cfg(feature = "defmt")]
                    {
                        warn!("FIFO status unreadable, stopping drain");
                    }
                    break;
                }
            }
            let mut buf = [0u8; 3];
            if self
                .iface
                .read_block(Block::Pressure.address(), &mut buf)
                .await
                .is_err()
            {
                continue;
            }
            let (quantity, raw) = fifo_entry(&buf);
            match self.compensate(&coefficients, quantity, raw) {
                Measurement::Temperature(t) => {
                    if let Some(slot) = temperature.get_mut(count.temperature) {
                        *slot = t;
                        count.temperature += 1;
                    }
                }
                Measurement::Pressure(p) => {
                    if let Some(slot) = pressure.get_mut(count.pressure) {
                        *slot = p;
                        count.pressure += 1;
                    }
                }
            }
        }
        Ok(count)
    }

    async fn standby(&mut self) -> Result<(), Dps310Error<E>> {
        self.ready()?;
        self.set_op_mode(OperatingMode::Idle).await?;
        write_field(&mut self.iface, Field::FifoFlush, 1).await?;
        write_field(&mut self.iface, Field::FifoEnable, 0).await
    }

    async fn set_interrupt_polarity(&mut self, active_high: bool) -> Result<(), Dps310Error<E>> {
        self.ready()?;
        if !self.iface.supports_interrupts() {
            return Err(Dps310Error::Unsupported);
        }
        write_field(&mut self.iface, Field::IrqActiveHigh, active_high as u8).await
    }

    async fn set_interrupt_sources(
        &mut self,
        sources: IrqSources,
    ) -> Result<(), Dps310Error<E>> {
        self.ready()?;
        if !self.iface.supports_interrupts() {
            return Err(Dps310Error::Unsupported);
        }
        write_field(&mut self.iface, Field::IrqFifoFull, sources.fifo_full as u8).await?;
        write_field(
            &mut self.iface,
            Field::IrqTemperatureReady,
            sources.temperature_ready as u8,
        )
        .await?;
        write_field(
            &mut self.iface,
            Field::IrqPressureReady,
            sources.pressure_ready as u8,
        )
        .await
    }

    async fn interrupt_status(&mut self) -> Result<InterruptStatus, Dps310Error<E>> {
        self.ready()?;
        let status = IrqStatus::read_register(&mut self.iface).await?;
        Ok(InterruptStatus {
            fifo_full: status.fifo_full(),
            temperature_ready: status.temperature(),
            pressure_ready: status.pressure(),
        })
    }

    async fn fifo_full(&mut self) -> Result<bool, Dps310Error<E>> {
        self.ready()?;
        Ok(read_field(&mut self.iface, Field::FifoFull).await? != 0)
    }
}
