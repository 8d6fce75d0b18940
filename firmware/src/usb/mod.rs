//! Dual-CDC USB composite for the controller.
//!
//! CDC0 carries the operator console and CDC1 carries the perception feed
//! (one line of counts per road). The wrapper owns the Embassy builder state
//! and hands each port out exactly once.

use embassy_usb::class::cdc_acm::{CdcAcmClass, ControlChanged, Receiver, Sender, State};
use embassy_usb::driver::Driver;
use embassy_usb::{Builder, Config, UsbDevice};

/// Logical identifier for each USB CDC interface exposed by the controller.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum UsbPortKind {
    /// Operator console on CDC0.
    Console,
    /// Perception feed on CDC1.
    Feed,
}

pub const MAX_PACKET_SIZE: u16 = 64;

const CONTROL_BUFFER_LEN: usize = 64;
const CONFIG_DESCRIPTOR_LEN: usize = 256;
const BOS_DESCRIPTOR_LEN: usize = 256;
const MSOS_DESCRIPTOR_LEN: usize = 256;

/// User-visible strings advertised in the USB descriptors.
#[derive(Clone, Copy, Debug)]
pub struct UsbDeviceStrings {
    pub manufacturer: &'static str,
    pub product: &'static str,
    pub serial_number: Option<&'static str>,
}

impl Default for UsbDeviceStrings {
    fn default() -> Self {
        Self {
            manufacturer: "Intersection Controller",
            product: "Right-of-Way Arbiter",
            serial_number: None,
        }
    }
}

/// Backing storage for the Embassy USB builder and CDC ACM classes.
pub struct UsbDeviceStorage {
    control_buf: [u8; CONTROL_BUFFER_LEN],
    config_descriptor: [u8; CONFIG_DESCRIPTOR_LEN],
    bos_descriptor: [u8; BOS_DESCRIPTOR_LEN],
    msos_descriptor: [u8; MSOS_DESCRIPTOR_LEN],
    console_state: State<'static>,
    feed_state: State<'static>,
}

impl UsbDeviceStorage {
    pub fn new() -> Self {
        Self {
            control_buf: [0; CONTROL_BUFFER_LEN],
            config_descriptor: [0; CONFIG_DESCRIPTOR_LEN],
            bos_descriptor: [0; BOS_DESCRIPTOR_LEN],
            msos_descriptor: [0; MSOS_DESCRIPTOR_LEN],
            console_state: State::new(),
            feed_state: State::new(),
        }
    }
}

/// Split handles for a CDC ACM interface.
pub struct CdcAcmHandle<D: Driver<'static>> {
    pub sender: Sender<'static, D>,
    pub receiver: Receiver<'static, D>,
    pub control: ControlChanged<'static>,
}

/// Owns both CDC ACM interfaces and the resulting USB device.
pub struct UsbComposite<D>
where
    D: Driver<'static>,
{
    pub device: UsbDevice<'static, D>,
    console: Option<CdcAcmHandle<D>>,
    feed: Option<CdcAcmHandle<D>>,
}

impl<D> UsbComposite<D>
where
    D: Driver<'static>,
{
    pub fn new(driver: D, storage: &'static mut UsbDeviceStorage, strings: UsbDeviceStrings) -> Self {
        let mut config = Config::new(0x1209, 0x0002);
        config.manufacturer = Some(strings.manufacturer);
        config.product = Some(strings.product);
        config.serial_number = strings.serial_number;
        config.max_packet_size_0 = 64;
        config.max_power = 100;
        config.device_class = 0xEF;
        config.device_sub_class = 0x02;
        config.device_protocol = 0x01;
        config.composite_with_iads = true;

        let mut builder = Builder::new(
            driver,
            config,
            &mut storage.config_descriptor,
            &mut storage.bos_descriptor,
            &mut storage.msos_descriptor,
            &mut storage.control_buf,
        );

        let console = CdcAcmClass::new(&mut builder, &mut storage.console_state, MAX_PACKET_SIZE);
        let feed = CdcAcmClass::new(&mut builder, &mut storage.feed_state, MAX_PACKET_SIZE);

        let (console_tx, console_rx, console_ctrl) = console.split_with_control();
        let (feed_tx, feed_rx, feed_ctrl) = feed.split_with_control();

        Self {
            device: builder.build(),
            console: Some(CdcAcmHandle {
                sender: console_tx,
                receiver: console_rx,
                control: console_ctrl,
            }),
            feed: Some(CdcAcmHandle {
                sender: feed_tx,
                receiver: feed_rx,
                control: feed_ctrl,
            }),
        }
    }

    /// Takes ownership of the requested CDC interface handles.
    pub fn take_port(&mut self, kind: UsbPortKind) -> Option<CdcAcmHandle<D>> {
        match kind {
            UsbPortKind::Console => self.console.take(),
            UsbPortKind::Feed => self.feed.take(),
        }
    }
}
