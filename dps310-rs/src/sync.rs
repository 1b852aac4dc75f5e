#[cfg(feature = "defmt")]
use defmt::{debug, error, info, trace, warn};
use embedded_hal::{delay::DelayNs, i2c, spi};

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

pub(crate) trait SyncInterface: Interface {
    type Error;
    fn write_byte(&mut self, address: u8, value: u8) -> Result<(), Self::Error>;
    fn read_block(&mut self, address: u8, buffer: &mut [u8]) -> Result<(), Self::Error>;

    fn read_byte(&mut self, address: u8) -> Result<u8, Self::Error> {
        let mut data = [0u8; 1];
        self.read_block(address, &mut data)?;
        Ok(data[0])
    }
}

impl<I2C, E> SyncInterface for I2cInterface<I2C>
where
    I2C: i2c::I2c<Error = E>,
{
    type Error = E;

    fn write_byte(&mut self, address: u8, value: u8) -> Result<(), Self::Error> {
        #[cfg(feature = "defmt")]
        {
            trace!("I2C Write to {:#x}: {=u8:#x}", address, value);
        }
        self.i2c.write(self.address, &[address, value])
    }

    fn read_block(&mut self, address: u8, buffer: &mut [u8]) -> Result<(), Self::Error> {
        self.i2c.write_read(self.address, &[address], buffer)?;
        #[cfg(feature = "defmt")]
        {
            trace!("I2C Read from {:#x}: {=[u8]:#x}", address, buffer);
        }
        Ok(())
    }
}

impl<SPI, E> SyncInterface for SpiInterface<SPI>
where
    SPI: spi::SpiDevice<Error = E>,
{
    type Error = E;

    fn write_byte(&mut self, address: u8, value: u8) -> Result<(), Self::Error> {
        #[cfg(feature = "defmt")]
        {
            trace!("SPI Write to {:#x}: {=u8:#x}", address, value);
        }
        self.spi.write(&[address & SPI_WRITE_MASK, value])
    }

    fn read_block(&mut self, address: u8, buffer: &mut [u8]) -> Result<(), Self::Error> {
        self.spi.transaction(&mut [
            spi::Operation::Write(&[address | SPI_READ]),
            spi::Operation::Read(buffer),
        ])?;
        #[cfg(feature = "defmt")]
        {
            trace!("SPI Read from {:#x}: {=[u8]:#x}", address, buffer);
        }
        Ok(())
    }
}

pub(crate) trait SyncRegister<IFACE>
where
    IFACE: SyncInterface,
    Self: Register + Sized,
{
    fn read_register(iface: &mut IFACE) -> Result<Self, IFACE::Error> {
        Ok(Self::from_u8(iface.read_byte(Self::ADDRESS)?))
    }
}

macro_rules! impl_sync_register {
    ($($reg:ty),+) => {
        $(
            impl<IFACE> SyncRegister<IFACE> for $reg
            where
                IFACE: SyncInterface,
            {}
        )+
    };
}

impl_sync_register! {MeasCfg, IrqStatus}

/// Read one bitfield.
fn read_field<IFACE: SyncInterface>(iface: &mut IFACE, field: Field) -> Result<u8, IFACE::Error> {
    let bf = field.bitfield();
    Ok(bf.extract(iface.read_byte(bf.address)?))
}

/// Read-modify-write one bitfield.
fn write_field<IFACE: SyncInterface>(
    iface: &mut IFACE,
    field: Field,
    value: u8,
) -> Result<(), Dps310Error<IFACE::Error>> {
    let bf = field.bitfield();
    if !bf.writable() {
        return Err(Dps310Error::ReadOnlyField(field));
    }
    let current = iface.read_byte(bf.address)?;
    iface.write_byte(bf.address, bf.insert(current, value))?;
    Ok(())
}

fn read_raw<IFACE: SyncInterface>(iface: &mut IFACE, block: Block) -> Result<i32, IFACE::Error> {
    let mut buf = [0u8; 3];
    iface.read_block(block.address(), &mut buf)?;
    Ok(raw_value(&buf))
}

/// Synchronous functions for the DPS310 sensor.
pub trait SyncFunctions<I, E, D> {
    /// Identify the sensor, load the calibration coefficients, apply the
    /// configuration and seed the temperature used for pressure compensation.
    ///
    /// Any failure permanently disables the driver.
    ///
    /// # Errors
    /// * Returns [`Dps310Error::InvalidDevice`] if the product ID is incorrect.
    /// * Returns [`Dps310Error::Comm`] if there is an error communicating with the device.
    /// * Returns [`Dps310Error::InitFailed`] if an earlier initialization failed.
    fn init(&mut self) -> Result<(), Dps310Error<E>>;

    /// Read the readiness flags from MEAS_CFG.
    fn sensor_status(&mut self) -> Result<SensorStatus, Dps310Error<E>>;

    /// Set temperature measurement rate and oversampling.
    ///
    /// The shift bit is updated along with the oversampling. If any write
    /// fails, one attempt is made to restore the previous settings and the
    /// original error is returned.
    fn config_temperature(
        &mut self,
        rate: MeasurementRate,
        oversampling: Oversampling,
    ) -> Result<(), Dps310Error<E>>;

    /// Set pressure measurement rate and oversampling. See [`SyncFunctions::config_temperature`].
    fn config_pressure(
        &mut self,
        rate: MeasurementRate,
        oversampling: Oversampling,
    ) -> Result<(), Dps310Error<E>>;

    /// Start a single temperature measurement. Only valid while idle.
    fn measure_temp_once(&mut self) -> Result<(), Dps310Error<E>>;

    /// Start a single pressure measurement. Only valid while idle.
    fn measure_pressure_once(&mut self) -> Result<(), Dps310Error<E>>;

    /// Collect the result of a pending single measurement.
    ///
    /// Returns [`Dps310Error::Unfinished`] while the conversion is running;
    /// poll again later. Returns [`Dps310Error::TooBusy`] if no single
    /// measurement is pending.
    fn get_single_result(&mut self) -> Result<Measurement, Dps310Error<E>>;

    /// Measure temperature once, waiting for the conversion to finish.
    fn sample_temperature(&mut self) -> Result<ThermodynamicTemperature, Dps310Error<E>>;

    /// Measure pressure once, waiting for the conversion to finish.
    ///
    /// Compensated with the most recent temperature reading.
    fn sample_pressure(&mut self) -> Result<Pressure, Dps310Error<E>>;

    /// Start background measurement into the FIFO. Only valid while idle.
    ///
    /// # Errors
    /// * Returns [`Dps310Error::InvalidConfiguration`] if the configured rates
    ///   and oversampling do not fit into one measurement period.
    fn start_continuous(&mut self, what: Continuous) -> Result<(), Dps310Error<E>>;

    /// Drain the FIFO into the given buffers.
    ///
    /// The drain gives up after 100 entries even if the FIFO still reports
    /// data; the FIFO itself holds at most 32.
    ///
    /// Results that do not fit into their buffer are discarded; the FIFO is
    /// always drained until empty so the next call only sees fresh data.
    fn get_cont_results(
        &mut self,
        temperature: &mut [ThermodynamicTemperature],
        pressure: &mut [Pressure],
    ) -> Result<ContResults, Dps310Error<E>>;

    /// Stop any measurement, flush and disable the FIFO.
    fn standby(&mut self) -> Result<(), Dps310Error<E>>;

    /// Set the interrupt pin polarity. Not available on 4-wire SPI.
    fn set_interrupt_polarity(&mut self, active_high: bool) -> Result<(), Dps310Error<E>>;

    /// Select the interrupt sources. Not available on 4-wire SPI.
    fn set_interrupt_sources(&mut self, sources: IrqSources) -> Result<(), Dps310Error<E>>;

    /// Read and clear the interrupt flags.
    fn interrupt_status(&mut self) -> Result<InterruptStatus, Dps310Error<E>>;

    /// Whether the FIFO is full.
    fn fifo_full(&mut self) -> Result<bool, Dps310Error<E>>;
}

/// Internal steps shared by the public operations.
trait SyncSteps<E> {
    fn run_init(&mut self) -> Result<(), Dps310Error<E>>;
    fn identify_and_calibrate(&mut self) -> Result<(), Dps310Error<E>>;
    fn set_op_mode(&mut self, mode: OperatingMode) -> Result<(), Dps310Error<E>>;
    fn write_settings(
        &mut self,
        quantity: Quantity,
        settings: SensorConfig,
    ) -> Result<(), Dps310Error<E>>;
    fn configure(&mut self, quantity: Quantity, settings: SensorConfig)
        -> Result<(), Dps310Error<E>>;
    fn measure_once(&mut self, quantity: Quantity) -> Result<(), Dps310Error<E>>;
    fn read_single(&mut self, quantity: Quantity) -> Result<i32, Dps310Error<E>>;
    fn sample(&mut self, quantity: Quantity) -> Result<i32, Dps310Error<E>>;
}

impl<IFACE, E, D> SyncSteps<E> for Dps310<IFACE, D>
where
    IFACE: SyncInterface<Error = E>,
    D: DelayNs,
{
    fn run_init(&mut self) -> Result<(), Dps310Error<E>> {
        self.identify_and_calibrate()?;
        self.standby()?;
        let config = self.config;
        self.config_temperature(config.temperature.rate, config.temperature.oversampling)?;
        self.config_pressure(config.pressure.rate, config.pressure.oversampling)?;
        if self.iface.supports_interrupts() {
            if let Some(active_high) = config.irq_active_high {
                self.set_interrupt_polarity(active_high)?;
            }
            if let Some(sources) = config.irq_sources {
                self.set_interrupt_sources(sources)?;
            }
        }
        // Seed the cached temperature for pressure compensation
        self.sample_temperature()?;
        self.standby()?;
        for (address, value) in TEMPERATURE_ERRATUM_PATCH {
            self.iface.write_byte(address, value)?;
        }
        // Measure again so the cached temperature reflects the patched sensor
        self.sample_temperature()?;
        Ok(())
    }

    fn identify_and_calibrate(&mut self) -> Result<(), Dps310Error<E>> {
        if self.iface.three_wire() {
            self.iface.write_byte(CFG_REG_ADDR, SPI_3WIRE_ENABLE)?;
        }
        let product = ProductId(read_field(&mut self.iface, Field::ProductId)?);
        if !product.validate() {
            return Err(Dps310Error::InvalidDevice);
        }
        self.product_id = product.0;
        self.revision_id = read_field(&mut self.iface, Field::RevisionId)?;
        #[cfg(feature = "defmt")]
        {
            info!("DPS310 revision {}", self.revision_id);
        }
        // Measure with the same temperature sensor the coefficients were calibrated against
        let source = read_field(&mut self.iface, Field::CoefficientSource)?;
        write_field(&mut self.iface, Field::TemperatureSource, source)?;

        let mut coeffs_buf = [0u8; COEFFICIENT_BLOCK_LEN];
        self.iface
            .read_block(Block::Coefficients.address(), &mut coeffs_buf)?;
        let coefficients = CalibrationCoefficients::from_registers(&coeffs_buf);
        #[cfg(feature = "defmt")]
        {
            debug!("Coefficients: {}", coefficients);
        }
        self.coefficients = Some(coefficients);
        Ok(())
    }

    fn set_op_mode(&mut self, mode: OperatingMode) -> Result<(), Dps310Error<E>> {
        write_field(&mut self.iface, Field::OpMode, mode.opcode())?;
        #[cfg(feature = "defmt")]
        {
            debug!("Operating mode {} -> {}", self.mode, mode);
        }
        self.mode = mode;
        Ok(())
    }

    fn write_settings(
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
        write_field(&mut self.iface, rate, settings.rate.into_bits())?;
        write_field(
            &mut self.iface,
            oversampling,
            settings.oversampling.into_bits(),
        )?;
        write_field(&mut self.iface, shift, settings.shift_enabled() as u8)
    }

    fn configure(
        &mut self,
        quantity: Quantity,
        settings: SensorConfig,
    ) -> Result<(), Dps310Error<E>> {
        self.ready()?;
        let previous = self.settings(quantity);
        match self.write_settings(quantity, settings) {
            Ok(()) => {
                self.commit(quantity, settings);
                Ok(())
            }
            Err(e) => {
                #[cfg(feature = "defmt")]
                {
                    warn!("Configuring {} failed, restoring {}", quantity, previous);
                }
                // Single rollback attempt, its outcome does not change the reported error
                if settings != previous {
                    let _ = self.write_settings(quantity, previous);
                }
                Err(e)
            }
        }
    }

    fn measure_once(&mut self, quantity: Quantity) -> Result<(), Dps310Error<E>> {
        self.ready()?;
        ensure_idle(self.mode)?;
        self.set_op_mode(quantity.single_shot())
    }

    fn read_single(&mut self, quantity: Quantity) -> Result<i32, Dps310Error<E>> {
        let (ready, block) = match quantity {
            Quantity::Temperature => (Field::TemperatureReady, Block::Temperature),
            Quantity::Pressure => (Field::PressureReady, Block::Pressure),
        };
        if read_field(&mut self.iface, ready)? == 0 {
            return Err(Dps310Error::Unfinished);
        }
        // The sensor clears the opcode once the result is available
        self.mode = OperatingMode::Idle;
        Ok(read_raw(&mut self.iface, block)?)
    }

    fn sample(&mut self, quantity: Quantity) -> Result<i32, Dps310Error<E>> {
        self.measure_once(quantity)?;
        let busy = self.settings(quantity).single_shot_busy_time();
        self.delay.delay_us(busy * 100);
        self.delay.delay_ms(BUSY_TIME_FAILSAFE_MS);
        let result = self.read_single(quantity);
        if result.is_err() {
            let _ = self.standby();
        }
        result
    }
}

impl<IFACE, E, D> SyncFunctions<IFACE, E, D> for Dps310<IFACE, D>
where
    IFACE: SyncInterface<Error = E>,
    D: DelayNs,
{
    fn init(&mut self) -> Result<(), Dps310Error<E>> {
        if self.init_failed {
            return Err(Dps310Error::InitFailed);
        }
        let result = self.run_init();
        if result.is_err() {
            #[cfg(feature = "defmt")]
            {
                error!("DPS310 initialization failed, driver disabled");
            }
            self.init_failed = true;
        }
        result
    }

    fn sensor_status(&mut self) -> Result<SensorStatus, Dps310Error<E>> {
        if self.init_failed {
            return Err(Dps310Error::InitFailed);
        }
        let status = MeasCfg::read_register(&mut self.iface)?;
        Ok(SensorStatus {
            coefficients_ready: status.coef_ready(),
            sensor_ready: status.sensor_ready(),
            temperature_ready: status.tmp_ready(),
            pressure_ready: status.prs_ready(),
        })
    }

    fn config_temperature(
        &mut self,
        rate: MeasurementRate,
        oversampling: Oversampling,
    ) -> Result<(), Dps310Error<E>> {
        self.configure(Quantity::Temperature, SensorConfig::new(rate, oversampling))
    }

    fn config_pressure(
        &mut self,
        rate: MeasurementRate,
        oversampling: Oversampling,
    ) -> Result<(), Dps310Error<E>> {
        self.configure(Quantity::Pressure, SensorConfig::new(rate, oversampling))
    }

    fn measure_temp_once(&mut self) -> Result<(), Dps310Error<E>> {
        self.measure_once(Quantity::Temperature)
    }

    fn measure_pressure_once(&mut self) -> Result<(), Dps310Error<E>> {
        self.measure_once(Quantity::Pressure)
    }

    fn get_single_result(&mut self) -> Result<Measurement, Dps310Error<E>> {
        let coefficients = self.ready()?;
        let quantity = pending_command(self.mode)?;
        let raw = self.read_single(quantity)?;
        Ok(self.compensate(&coefficients, quantity, raw))
    }

    fn sample_temperature(&mut self) -> Result<ThermodynamicTemperature, Dps310Error<E>> {
        let coefficients = self.ready()?;
        let raw = self.sample(Quantity::Temperature)?;
        Ok(self.compensate_temperature(&coefficients, raw))
    }

    fn sample_pressure(&mut self) -> Result<Pressure, Dps310Error<E>> {
        let coefficients = self.ready()?;
        let raw = self.sample(Quantity::Pressure)?;
        Ok(self.compensate_pressure(&coefficients, raw))
    }

    fn start_continuous(&mut self, what: Continuous) -> Result<(), Dps310Error<E>> {
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
        write_field(&mut self.iface, Field::FifoEnable, 1)?;
        self.set_op_mode(what.mode())
    }

    fn get_cont_results(
        &mut self,
        temperature: &mut [ThermodynamicTemperature],
        pressure: &mut [Pressure],
    ) -> Result<ContResults, Dps310Error<E>> {
        let coefficients = self.ready()?;
        ensure_background(self.mode)?;
        let mut count = ContResults::default();
        for _ in 0..MAX_LOOPS {
            match read_field(&mut self.iface, Field::FifoEmpty) {
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
                .is_err()
            {
                // Retried on the next iteration while the FIFO reports data
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

    fn standby(&mut self) -> Result<(), Dps310Error<E>> {
        self.ready()?;
        self.set_op_mode(OperatingMode::Idle)?;
        write_field(&mut self.iface, Field::FifoFlush, 1)?;
        write_field(&mut self.iface, Field::FifoEnable, 0)
    }

    fn set_interrupt_polarity(&mut self, active_high: bool) -> Result<(), Dps310Error<E>> {
        self.ready()?;
        if !self.iface.supports_interrupts() {
            return Err(Dps310Error::Unsupported);
        }
        write_field(&mut self.iface, Field::IrqActiveHigh, active_high as u8)
    }

    fn set_interrupt_sources(&mut self, sources: IrqSources) -> Result<(), Dps310Error<E>> {
        self.ready()?;
        if !self.iface.supports_interrupts() {
            return Err(Dps310Error::Unsupported);
        }
        write_field(&mut self.iface, Field::IrqFifoFull, sources.fifo_full as u8)?;
        write_field(
            &mut self.iface,
            Field::IrqTemperatureReady,
            sources.temperature_ready as u8,
        )?;
        write_field(
            &mut self.iface,
            Field::IrqPressureReady,
            sources.pressure_ready as u8,
        )
    }

    fn interrupt_status(&mut self) -> Result<InterruptStatus, Dps310Error<E>> {
        self.ready()?;
        let status = IrqStatus::read_register(&mut self.iface)?;
        Ok(InterruptStatus {
            fifo_full: status.fifo_full(),
            temperature_ready: status.temperature(),
            pressure_ready: status.pressure(),
        })
    }

    fn fifo_full(&mut self) -> Result<bool, Dps310Error<E>> {
        self.ready()?;
        Ok(read_field(&mut self.iface, Field::FifoFull)? != 0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{
        conversion::scale, degree_celsius, pascal, Dps310Config, Fixed, StatusCode,
        DEFAULT_I2C_ADDRESS,
    };
    use embedded_hal_mock::eh1::{
        delay::NoopDelay,
        i2c::{Mock as I2cMock, Transaction as I2cTransaction},
        spi::{Mock as SpiMock, Transaction as SpiTransaction},
    };
    use embedded_hal::i2c::ErrorKind;

    const ADDR: u8 = DEFAULT_I2C_ADDRESS;

    const COEF: [u8; 18] = [
        0x0C, 0xBE, 0xFC, 0x13, 0xD9, 0xAF, 0x2B, 0x34, 0xF3, 0xF7, 0x04, 0xFF, 0xDA, 0x5A, 0x00,
        0x0A, 0xFB, 0x1B,
    ];

    fn read(reg: u8, value: u8) -> I2cTransaction {
        I2cTransaction::write_read(ADDR, vec![reg], vec![value])
    }

    fn write(reg: u8, value: u8) -> I2cTransaction {
        I2cTransaction::write(ADDR, vec![reg, value])
    }

    fn read_block(reg: u8, data: &[u8]) -> I2cTransaction {
        I2cTransaction::write_read(ADDR, vec![reg], data.to_vec())
    }

    fn io_error() -> ErrorKind {
        ErrorKind::Other
    }

    /// Idle opcode, FIFO flush, FIFO disable
    fn standby() -> Vec<I2cTransaction> {
        vec![
            read(0x08, 0xC0),
            write(0x08, 0xC0),
            read(0x0C, 0x00),
            write(0x0C, 0x80),
            read(0x09, 0x00),
            write(0x09, 0x00),
        ]
    }

    /// Single temperature measurement returning 123456
    fn sample_temperature() -> Vec<I2cTransaction> {
        vec![
            read(0x08, 0xC0),
            write(0x08, 0xC2),
            read(0x08, 0xE2),
            read_block(0x03, &[0x01, 0xE2, 0x40]),
        ]
    }

    fn i2c_driver(expectations: &[I2cTransaction]) -> Dps310<I2cInterface<I2cMock>, NoopDelay> {
        Dps310::new_with_i2c(
            I2cMock::new(expectations),
            ADDR,
            Dps310Config::default(),
            NoopDelay::new(),
        )
    }

    /// Driver that skipped `init`, with coefficients loaded.
    fn initialized(
        expectations: &[I2cTransaction],
    ) -> Dps310<I2cInterface<I2cMock>, NoopDelay> {
        let mut dps = i2c_driver(expectations);
        dps.coefficients = Some(CalibrationCoefficients::from_registers(&COEF));
        dps
    }

    #[test]
    fn init_sequence() {
        let mut expectations = vec![
            // product and revision
            read(0x0D, 0x10),
            read(0x0D, 0x10),
            // coefficient source copied to the temperature source
            read(0x28, 0x80),
            read(0x07, 0x00),
            write(0x07, 0x80),
            read_block(0x10, &COEF),
        ];
        expectations.extend(standby());
        expectations.extend([
            // temperature 4 Hz, 8x
            read(0x07, 0x80),
            write(0x07, 0xA0),
            read(0x07, 0xA0),
            write(0x07, 0xA3),
            read(0x09, 0x00),
            write(0x09, 0x00),
            // pressure 4 Hz, 8x
            read(0x06, 0x00),
            write(0x06, 0x20),
            read(0x06, 0x20),
            write(0x06, 0x23),
            read(0x09, 0x00),
            write(0x09, 0x00),
        ]);
        expectations.extend(sample_temperature());
        expectations.extend(standby());
        expectations.extend([
            write(0x0E, 0xA5),
            write(0x0F, 0x96),
            write(0x62, 0x02),
            write(0x0E, 0x00),
            write(0x0F, 0x00),
        ]);
        expectations.extend(sample_temperature());

        let mut dps = i2c_driver(&expectations);
        dps.init().unwrap();

        assert!(!dps.init_failed());
        assert_eq!(dps.product_id(), 0);
        assert_eq!(dps.revision_id(), 1);
        assert_eq!(dps.mode(), OperatingMode::Idle);
        assert_eq!(dps.temperature_config(), dps.config().temperature());
        assert_eq!(dps.pressure_config(), dps.config().pressure());
        let coefficients = dps.coefficients().unwrap();
        assert_eq!(coefficients.c0_half, 101);
        assert_eq!(coefficients.c30, -1253);
        assert_eq!(
            dps.last_temperature_scale(),
            scale(123_456, Oversampling::X8)
        );

        let (mut i2c, _) = dps.release();
        i2c.done();
    }

    #[test]
    fn failed_init_is_permanent() {
        let mut dps = i2c_driver(&[read(0x0D, 0x11)]);
        let result = dps.init();
        assert!(matches!(result, Err(Dps310Error::InvalidDevice)));
        assert_eq!(StatusCode::of(&result), StatusCode::FailInitFailed);
        assert!(dps.init_failed());

        // Nothing touches the bus afterwards
        assert!(matches!(dps.init(), Err(Dps310Error::InitFailed)));
        assert!(matches!(
            dps.measure_temp_once(),
            Err(Dps310Error::InitFailed)
        ));
        assert!(matches!(dps.standby(), Err(Dps310Error::InitFailed)));
        assert!(matches!(dps.sensor_status(), Err(Dps310Error::InitFailed)));

        let (mut i2c, _) = dps.release();
        i2c.done();
    }

    #[test]
    fn bus_error_during_init_latches_failure() {
        let mut dps = i2c_driver(&[read(0x0D, 0x10).with_error(io_error())]);
        assert!(matches!(dps.init(), Err(Dps310Error::Comm(_))));
        assert!(dps.init_failed());
        assert!(dps.coefficients().is_none());

        let (mut i2c, _) = dps.release();
        i2c.done();
    }

    #[test]
    fn operations_before_init() {
        let mut dps = i2c_driver(&[]);
        let result = dps.get_single_result();
        assert!(matches!(result, Err(Dps310Error::NotInitialized)));
        assert_eq!(StatusCode::of(&result), StatusCode::FailInitFailed);

        let (mut i2c, _) = dps.release();
        i2c.done();
    }

    #[test]
    fn single_result_needs_pending_command() {
        let mut dps = initialized(&[]);
        let result = dps.get_single_result();
        assert!(matches!(result, Err(Dps310Error::TooBusy)));
        assert_eq!(StatusCode::of(&result), StatusCode::FailTooBusy);

        dps.mode = OperatingMode::ContinuousBoth;
        assert!(matches!(
            dps.get_single_result(),
            Err(Dps310Error::TooBusy)
        ));

        let (mut i2c, _) = dps.release();
        i2c.done();
    }

    #[test]
    fn single_temperature_measurement() {
        let mut dps = initialized(&[
            read(0x08, 0xC0),
            write(0x08, 0xC2),
            // conversion still running
            read(0x08, 0xC2),
            read(0x08, 0xE2),
            read_block(0x03, &[0x01, 0xE2, 0x40]),
        ]);

        dps.measure_temp_once().unwrap();
        assert_eq!(dps.mode(), OperatingMode::CommandTemperature);
        // A second command is rejected while the first is pending
        assert!(matches!(
            dps.measure_pressure_once(),
            Err(Dps310Error::TooBusy)
        ));

        let result = dps.get_single_result();
        assert!(matches!(result, Err(Dps310Error::Unfinished)));
        assert_eq!(StatusCode::of(&result), StatusCode::FailUnfinished);
        assert_eq!(dps.mode(), OperatingMode::CommandTemperature);

        let t = dps.get_single_result().unwrap().temperature().unwrap();
        // 101 - 260 * 123456 / 524288
        assert!((t.get::<degree_celsius>() - 39.776_855).abs() < 1e-3);
        assert_eq!(dps.mode(), OperatingMode::Idle);
        assert_eq!(
            dps.last_temperature_scale(),
            scale(123_456, Oversampling::X1)
        );

        let (mut i2c, _) = dps.release();
        i2c.done();
    }

    #[test]
    fn single_pressure_measurement() {
        let mut dps = initialized(&[
            read(0x08, 0xC0),
            write(0x08, 0xC1),
            read(0x08, 0xD1),
            read_block(0x00, &[0x04, 0x00, 0x00]),
        ]);

        dps.measure_pressure_once().unwrap();
        assert_eq!(dps.mode(), OperatingMode::CommandPressure);
        let p = dps.get_single_result().unwrap().pressure().unwrap();
        // No temperature yet: c00 + p * (c10 + p * (c20 + p * c30)) with p = 0.5
        assert!((p.get::<pascal>() - 51_501.875).abs() < 1e-2);
        assert_eq!(dps.mode(), OperatingMode::Idle);

        let (mut i2c, _) = dps.release();
        i2c.done();
    }

    #[test]
    fn failed_sample_returns_to_standby() {
        let mut expectations = vec![
            read(0x08, 0xC0),
            write(0x08, 0xC1),
            read(0x08, 0xC1).with_error(io_error()),
        ];
        expectations.extend(standby());
        let mut dps = initialized(&expectations);

        assert!(matches!(dps.sample_pressure(), Err(Dps310Error::Comm(_))));
        assert_eq!(dps.mode(), OperatingMode::Idle);

        let (mut i2c, _) = dps.release();
        i2c.done();
    }

    #[test]
    fn fifo_drain_drops_excess_results() {
        let mut dps = initialized(&[
            read(0x0B, 0x00),
            read_block(0x00, &[0x01, 0xE2, 0x40]),
            read(0x0B, 0x00),
            read_block(0x00, &[0x00, 0x00, 0x01]),
            read(0x0B, 0x00),
            read_block(0x00, &[0x00, 0x00, 0x00]),
            read(0x0B, 0x01),
        ]);
        dps.mode = OperatingMode::ContinuousBoth;

        let mut temperature = [ThermodynamicTemperature::new::<degree_celsius>(0.0); 1];
        let mut pressure = [Pressure::new::<pascal>(0.0); 1];
        let count = dps
            .get_cont_results(&mut temperature, &mut pressure)
            .unwrap();
        assert_eq!(
            count,
            ContResults {
                temperature: 1,
                pressure: 1
            }
        );
        assert!((temperature[0].get::<degree_celsius>() - 39.776_855).abs() < 1e-3);
        // The dropped temperature still refreshes the compensation input
        assert_eq!(dps.last_temperature_scale(), Fixed::ZERO);
        assert_eq!(dps.mode(), OperatingMode::ContinuousBoth);

        let (mut i2c, _) = dps.release();
        i2c.done();
    }

    #[test]
    fn fifo_drain_with_empty_buffers() {
        let mut dps = initialized(&[
            read(0x0B, 0x00),
            read_block(0x00, &[0x00, 0x10, 0x01]),
            read(0x0B, 0x01),
        ]);
        dps.mode = OperatingMode::ContinuousPressure;

        let count = dps.get_cont_results(&mut [], &mut []).unwrap();
        assert_eq!(count, ContResults::default());

        let (mut i2c, _) = dps.release();
        i2c.done();
    }

    #[test]
    fn fifo_drain_stops_on_status_error() {
        let mut dps = initialized(&[
            read(0x0B, 0x00),
            read_block(0x00, &[0x00, 0x10, 0x01]),
            read(0x0B, 0x00).with_error(io_error()),
        ]);
        dps.mode = OperatingMode::ContinuousPressure;

        let mut pressure = [Pressure::new::<pascal>(0.0); 4];
        let count = dps.get_cont_results(&mut [], &mut pressure).unwrap();
        assert_eq!(count.pressure, 1);
        assert_eq!(count.temperature, 0);

        let (mut i2c, _) = dps.release();
        i2c.done();
    }

    #[test]
    fn fifo_drain_skips_failed_entry_read() {
        let mut dps = initialized(&[
            read(0x0B, 0x00),
            I2cTransaction::write_read(ADDR, vec![0x00], vec![0x00, 0x00, 0x00])
                .with_error(io_error()),
            read(0x0B, 0x00),
            read_block(0x00, &[0x00, 0x10, 0x01]),
            read(0x0B, 0x01),
        ]);
        dps.mode = OperatingMode::ContinuousPressure;

        let mut pressure = [Pressure::new::<pascal>(0.0); 4];
        let count = dps.get_cont_results(&mut [], &mut pressure).unwrap();
        assert_eq!(
            count,
            ContResults {
                temperature: 0,
                pressure: 1
            }
        );

        let (mut i2c, _) = dps.release();
        i2c.done();
    }

    #[test]
    fn fifo_drain_needs_background_mode() {
        let mut dps = initialized(&[]);
        assert!(matches!(
            dps.get_cont_results(&mut [], &mut []),
            Err(Dps310Error::TooBusy)
        ));

        let (mut i2c, _) = dps.release();
        i2c.done();
    }

    #[test]
    fn start_continuous() {
        let mut dps = initialized(&[
            read(0x09, 0x00),
            write(0x09, 0x02),
            read(0x08, 0xC0),
            write(0x08, 0xC7),
        ]);

        dps.start_continuous(Continuous::Both).unwrap();
        assert_eq!(dps.mode(), OperatingMode::ContinuousBoth);
        assert!(matches!(
            dps.start_continuous(Continuous::Pressure),
            Err(Dps310Error::TooBusy)
        ));

        let (mut i2c, _) = dps.release();
        i2c.done();
    }

    #[test]
    fn start_continuous_rejects_overlong_period() {
        let mut dps = initialized(&[]);
        dps.temperature = SensorConfig::new(MeasurementRate::Hz128, Oversampling::X128);
        dps.pressure = dps.temperature;

        assert!(matches!(
            dps.start_continuous(Continuous::Both),
            Err(Dps310Error::InvalidConfiguration)
        ));
        assert_eq!(dps.mode(), OperatingMode::Idle);

        let (mut i2c, _) = dps.release();
        i2c.done();
    }

    #[test]
    fn configuration_rolls_back_on_failure() {
        let mut dps = initialized(&[
            read(0x07, 0x00),
            write(0x07, 0x20),
            read(0x07, 0x20),
            write(0x07, 0x23).with_error(io_error()),
            // restore 1 Hz, 1x
            read(0x07, 0x20),
            write(0x07, 0x00),
            read(0x07, 0x00),
            write(0x07, 0x00),
            read(0x09, 0x00),
            write(0x09, 0x00),
        ]);
        let previous = dps.temperature_config();

        assert!(matches!(
            dps.config_temperature(MeasurementRate::Hz4, Oversampling::X8),
            Err(Dps310Error::Comm(_))
        ));
        assert_eq!(dps.temperature_config(), previous);

        let (mut i2c, _) = dps.release();
        i2c.done();
    }

    #[test]
    fn failed_shift_write_rolls_back_all_fields() {
        let mut dps = initialized(&[
            read(0x06, 0x00),
            write(0x06, 0x40),
            read(0x06, 0x40),
            write(0x06, 0x46),
            read(0x09, 0x00),
            write(0x09, 0x04).with_error(io_error()),
            // restore 1 Hz, 1x, no shift
            read(0x06, 0x46),
            write(0x06, 0x06),
            read(0x06, 0x06),
            write(0x06, 0x00),
            read(0x09, 0x00),
            write(0x09, 0x00),
        ]);
        let previous = dps.pressure_config();

        assert!(matches!(
            dps.config_pressure(MeasurementRate::Hz16, Oversampling::X64),
            Err(Dps310Error::Comm(_))
        ));
        assert_eq!(dps.pressure_config(), previous);

        let (mut i2c, _) = dps.release();
        i2c.done();
    }

    #[test]
    fn configuration_sets_shift_bit() {
        let mut dps = initialized(&[
            read(0x06, 0x00),
            write(0x06, 0x40),
            read(0x06, 0x40),
            write(0x06, 0x46),
            read(0x09, 0x00),
            write(0x09, 0x04),
        ]);

        dps.config_pressure(MeasurementRate::Hz16, Oversampling::X64)
            .unwrap();
        assert_eq!(
            dps.pressure_config(),
            SensorConfig::new(MeasurementRate::Hz16, Oversampling::X64)
        );

        let (mut i2c, _) = dps.release();
        i2c.done();
    }

    #[test]
    fn interrupt_configuration_over_i2c() {
        let mut dps = initialized(&[
            read(0x09, 0x00),
            write(0x09, 0x80),
            read(0x09, 0x80),
            write(0x09, 0xC0),
            read(0x09, 0xC0),
            write(0x09, 0xE0),
            read(0x09, 0xE0),
            write(0x09, 0xE0),
            read(0x0A, 0b101),
        ]);

        dps.set_interrupt_polarity(true).unwrap();
        dps.set_interrupt_sources(IrqSources {
            fifo_full: true,
            temperature_ready: true,
            pressure_ready: false,
        })
        .unwrap();
        assert_eq!(
            dps.interrupt_status().unwrap(),
            InterruptStatus {
                fifo_full: true,
                temperature_ready: false,
                pressure_ready: true,
            }
        );

        let (mut i2c, _) = dps.release();
        i2c.done();
    }

    #[test]
    fn status_registers() {
        let mut dps = initialized(&[read(0x08, 0xD0), read(0x0B, 0x02)]);

        assert_eq!(
            dps.sensor_status().unwrap(),
            SensorStatus {
                coefficients_ready: true,
                sensor_ready: true,
                temperature_ready: false,
                pressure_ready: true,
            }
        );
        assert!(dps.fifo_full().unwrap());

        let (mut i2c, _) = dps.release();
        i2c.done();
    }

    #[test]
    fn read_only_fields_are_not_written() {
        let mut iface = I2cInterface {
            i2c: I2cMock::new(&[]),
            address: ADDR,
        };
        assert!(matches!(
            write_field(&mut iface, Field::ProductId, 1),
            Err(Dps310Error::ReadOnlyField(Field::ProductId))
        ));
        assert!(matches!(
            write_field(&mut iface, Field::FifoEmpty, 1),
            Err(Dps310Error::ReadOnlyField(Field::FifoEmpty))
        ));
        iface.i2c.done();
    }

    #[test]
    fn interrupts_unavailable_on_4wire_spi() {
        let mut dps = Dps310::new_with_spi(
            SpiMock::<u8>::new(&[]),
            Dps310Config::default(),
            NoopDelay::new(),
        );
        dps.coefficients = Some(CalibrationCoefficients::from_registers(&COEF));

        assert!(matches!(
            dps.set_interrupt_polarity(false),
            Err(Dps310Error::Unsupported)
        ));
        assert!(matches!(
            dps.set_interrupt_sources(IrqSources::default()),
            Err(Dps310Error::Unsupported)
        ));

        let (mut spi, _) = dps.release();
        spi.done();
    }

    #[test]
    fn spi_address_encoding() {
        let mut iface = SpiInterface {
            spi: SpiMock::<u8>::new(&[
                SpiTransaction::transaction_start(),
                SpiTransaction::write_vec(vec![0x88]),
                SpiTransaction::read_vec(vec![0xC0]),
                SpiTransaction::transaction_end(),
                SpiTransaction::transaction_start(),
                SpiTransaction::write_vec(vec![0x08, 0xC2]),
                SpiTransaction::transaction_end(),
            ]),
            three_wire: false,
        };
        write_field(&mut iface, Field::OpMode, 0x2).unwrap();
        iface.spi.done();
    }

    #[test]
    fn three_wire_spi_is_selected_first() {
        let mut dps = Dps310::new_with_spi_3wire(
            SpiMock::<u8>::new(&[
                SpiTransaction::transaction_start(),
                SpiTransaction::write_vec(vec![0x09, 0x01]),
                SpiTransaction::transaction_end(),
                SpiTransaction::transaction_start(),
                SpiTransaction::write_vec(vec![0x8D]),
                SpiTransaction::read_vec(vec![0x1F]),
                SpiTransaction::transaction_end(),
            ]),
            Dps310Config::default(),
            NoopDelay::new(),
        );

        assert!(matches!(dps.init(), Err(Dps310Error::InvalidDevice)));

        let (mut spi, _) = dps.release();
        spi.done();
    }
}
