use embassy_futures::join::{join, join3};
use embassy_futures::select::{Either, select};
use embassy_stm32 as hal;
use embassy_stm32::Peri;
use embassy_usb::class::cdc_acm::{ControlChanged, Receiver, Sender};
use embassy_usb::driver::{Driver, EndpointError};
use intersection_core::scheduler::RequestScheduler;

use super::{DECISION_QUEUE, USB_STORAGE};
use crate::decisions::{FirmwareInstant, RequestProducer};
use crate::feed::FeedIngest;
use crate::repl::{ReplError, ReplOutput, ReplSession};
use crate::status::FirmwareStatus;
use crate::usb::{self, UsbDeviceStrings, UsbPortKind};

const PACKET_LEN: usize = usb::MAX_PACKET_SIZE as usize;

embassy_stm32::bind_interrupts!(struct UsbIrqs {
    USB_UCPD1_2 => embassy_stm32::usb::InterruptHandler<hal::peripherals::USB>;
});

#[embassy_executor::task]
pub async fn run(
    usb: Peri<'static, hal::peripherals::USB>,
    dp: Peri<'static, hal::peripherals::PA12>,
    dm: Peri<'static, hal::peripherals::PA11>,
) -> ! {
    let storage = USB_STORAGE.init(usb::UsbDeviceStorage::new());
    let driver = embassy_stm32::usb::Driver::new(usb, UsbIrqs, dp, dm);
    let mut composite = usb::UsbComposite::new(driver, storage, UsbDeviceStrings::default());

    let console = defmt::unwrap!(composite.take_port(UsbPortKind::Console));
    let feed = defmt::unwrap!(composite.take_port(UsbPortKind::Feed));
    let mut device = composite.device;

    join3(
        device.run(),
        run_console_interface(console.sender, console.receiver, console.control),
        run_feed_interface(feed.sender, feed.receiver, feed.control),
    )
    .await;
    loop {
        core::future::pending::<()>().await;
    }
}

async fn run_console_interface<D>(
    mut sender: Sender<'static, D>,
    mut receiver: Receiver<'static, D>,
    control: ControlChanged<'static>,
) -> !
where
    D: Driver<'static>,
{
    let scheduler = RequestScheduler::new(RequestProducer::new(DECISION_QUEUE.sender()));
    let mut session = ReplSession::new(scheduler, FirmwareStatus);
    let mut ingress = [0u8; PACKET_LEN];
    let mut output = ReplOutput::new();

    loop {
        join(receiver.wait_connection(), sender.wait_connection()).await;
        wait_for_dtr(&control, &sender).await;
        defmt::info!("usb: console interface connected");

        output.clear();
        if session.on_connect(&mut output).is_err() {
            defmt::warn!("usb: console banner truncated");
        }

        loop {
            if write_all(&mut sender, output.as_bytes()).await.is_err() {
                defmt::warn!("usb: console write disabled");
                break;
            }
            output.clear();

            match select(receiver.read_packet(&mut ingress), control.control_changed()).await {
                Either::First(Ok(count)) => {
                    let now = FirmwareInstant::now();
                    for byte in &ingress[..count] {
                        match session.ingest(*byte, now, &mut output) {
                            Ok(()) => {}
                            Err(ReplError::LineOverflow) => {
                                defmt::warn!("usb: console line too long");
                            }
                            Err(ReplError::OutputOverflow) => {
                                defmt::warn!("usb: console response truncated");
                            }
                        }
                    }
                }
                Either::First(Err(EndpointError::Disabled)) => {
                    defmt::warn!("usb: console interface disabled");
                    break;
                }
                Either::First(Err(EndpointError::BufferOverflow)) => {
                    defmt::warn!("usb: console read overflow");
                }
                Either::Second(()) => {
                    if !sender.dtr() {
                        defmt::warn!("usb: console host dropped DTR");
                        break;
                    }
                }
            }
        }
        session.on_disconnect();
    }
}

async fn run_feed_interface<D>(
    sender: Sender<'static, D>,
    mut receiver: Receiver<'static, D>,
    control: ControlChanged<'static>,
) -> !
where
    D: Driver<'static>,
{
    let mut ingest = FeedIngest::new(RequestProducer::new(DECISION_QUEUE.sender()));
    let mut ingress = [0u8; PACKET_LEN];

    loop {
        receiver.wait_connection().await;
        wait_for_dtr(&control, &sender).await;
        defmt::info!("usb: feed interface connected");

        loop {
            match select(receiver.read_packet(&mut ingress), control.control_changed()).await {
                Either::First(Ok(count)) => {
                    let now = FirmwareInstant::now();
                    for byte in &ingress[..count] {
                        ingest.ingest(*byte, now);
                    }
                }
                Either::First(Err(EndpointError::Disabled)) => {
                    defmt::warn!("usb: feed interface disabled");
                    break;
                }
                Either::First(Err(EndpointError::BufferOverflow)) => {
                    defmt::warn!("usb: feed read overflow");
                }
                Either::Second(()) => {
                    if !sender.dtr() {
                        defmt::warn!("usb: feed host dropped DTR");
                        break;
                    }
                }
            }
        }
        ingest.reset();
    }
}

/// Writes `bytes` in packet-sized chunks, closing with a zero-length packet when needed.
async fn write_all<D>(sender: &mut Sender<'static, D>, bytes: &[u8]) -> Result<(), EndpointError>
where
    D: Driver<'static>,
{
    if bytes.is_empty() {
        return Ok(());
    }
    for chunk in bytes.chunks(PACKET_LEN) {
        sender.write_packet(chunk).await?;
    }
    if bytes.len() % PACKET_LEN == 0 {
        sender.write_packet(&[]).await?;
    }
    Ok(())
}

async fn wait_for_dtr<D>(control: &ControlChanged<'static>, sender: &Sender<'static, D>)
where
    D: Driver<'static>,
{
    while !sender.dtr() {
        control.control_changed().await;
    }
}
