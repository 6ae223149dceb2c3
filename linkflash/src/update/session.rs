//! Update session state machine.

use std::collections::VecDeque;
use std::thread;

use log::{debug, info, trace, warn};

use crate::error::{Error, Result};
use crate::image::FirmwareImage;
use crate::protocol::Packet;
use crate::transport::Transport;
use crate::update::command::CommandFrame;
use crate::update::{BlockProgress, MAX_BLOCK_SIZE, UpdateConfig, UpdateReport};

/// Blocks are numbered with a `u16` on the wire.
const MAX_BLOCKS: usize = u16::MAX as usize + 1;

/// One firmware update over a borrowed transport.
///
/// The session sends one command at a time and waits for its reply before
/// sending the next.
pub struct UpdateSession<'a, T: Transport + ?Sized> {
    link: &'a mut T,
    image: &'a FirmwareImage,
    config: UpdateConfig,
    interrupted: fn() -> bool,
}

impl<'a, T: Transport + ?Sized> UpdateSession<'a, T> {
    /// Prepare a session, checking that the image can be addressed with the
    /// configured block size.
    pub fn new(link: &'a mut T, image: &'a FirmwareImage, config: UpdateConfig) -> Result<Self> {
        if config.block_size == 0 || config.block_size > MAX_BLOCK_SIZE {
            return Err(Error::Config(format!(
                "block size {} outside 1..={MAX_BLOCK_SIZE}",
                config.block_size
            )));
        }
        let blocks = image.block_count(config.block_size);
        if blocks > MAX_BLOCKS {
            return Err(Error::InvalidImage(format!(
                "{} bytes need {blocks} blocks of {}, at most {MAX_BLOCKS} can be addressed",
                image.len(),
                config.block_size
            )));
        }

        Ok(Self {
            link,
            image,
            config,
            interrupted: crate::is_interrupted_requested,
        })
    }

    /// Replace the interruption check consulted between blocks.
    #[must_use]
    pub fn with_interrupt_check(mut self, interrupted: fn() -> bool) -> Self {
        self.interrupted = interrupted;
        self
    }

    /// Run the whole session.
    ///
    /// `progress` is called before every BLOCK transmission.
    #[allow(clippy::cast_possible_truncation)]
    pub fn run<F>(&mut self, mut progress: F) -> Result<UpdateReport>
    where
        F: FnMut(&BlockProgress),
    {
        let block_size = self.config.block_size;
        let total = self.image.block_count(block_size);
        info!(
            "Updating {} bytes in {total} blocks of {block_size} on {}",
            self.image.len(),
            self.link.port_path()
        );

        let mut report = UpdateReport::default();
        self.negotiate(&mut report)?;
        thread::sleep(self.config.settle_delay);

        let mut pending: VecDeque<usize> = self.image.block_offsets(block_size).collect();
        let mut attempts = vec![0u32; total];

        while let Some(offset) = pending.pop_front() {
            if (self.interrupted)() {
                warn!("Update interrupted with {} block(s) pending", pending.len() + 1);
                return Err(Error::Interrupted);
            }

            let ordinal = offset / block_size;
            attempts[ordinal] += 1;
            let attempt = attempts[ordinal];
            if attempt > 1 {
                thread::sleep(self.config.retry.delay(attempt - 1));
                report.retransmissions += 1;
            }

            progress(&BlockProgress {
                offset,
                ordinal,
                attempt,
                pending: pending.len(),
                total,
            });

            let Some(block) = self.image.block(offset, block_size) else {
                continue;
            };
            // Safe cast: block count checked against MAX_BLOCKS in new()
            let command = CommandFrame::block(ordinal as u16, block);
            report.blocks_sent += 1;

            let Some(reply) = self.request(&command)? else {
                return Err(Error::Timeout(format!(
                    "no response to block {ordinal} (offset {offset})"
                )));
            };

            for &failed in reply.payload().iter().skip(1) {
                let failed = usize::from(failed);
                if failed >= total {
                    warn!("Device reported unknown block {failed} as failed");
                    continue;
                }
                if !self.config.retry.allows(attempts[failed]) {
                    return Err(Error::RetriesExhausted {
                        offset: failed * block_size,
                        attempts: attempts[failed],
                    });
                }
                debug!("Block {failed} failed on device, queued for retry");
                pending.push_back(failed * block_size);
            }
        }

        info!(
            "Update complete: {} block transmission(s), {} retransmission(s)",
            report.blocks_sent, report.retransmissions
        );
        Ok(report)
    }

    /// INIT, and on silence CANCEL followed by one more INIT.
    #[allow(clippy::cast_possible_truncation)]
    fn negotiate(&mut self, report: &mut UpdateReport) -> Result<()> {
        // Safe casts: image size checked in FirmwareImage, block size in new()
        let init = CommandFrame::init(
            self.image.len() as u32,
            self.config.block_size as u16,
            self.image.digest(),
        );

        report.init_attempts += 1;
        if self.request(&init)?.is_some() {
            debug!("Device accepted update request");
            return Ok(());
        }

        warn!("No response to INIT, cancelling previous session");
        if self.request(&CommandFrame::cancel())?.is_none() {
            return Err(Error::Timeout("no response to CANCEL".into()));
        }
        thread::sleep(self.config.settle_delay);

        report.init_attempts += 1;
        if self.request(&init)?.is_none() {
            return Err(Error::Timeout("no response to INIT after CANCEL".into()));
        }
        debug!("Device accepted update request after CANCEL");
        Ok(())
    }

    /// Send one command and wait for its reply.
    fn request(&mut self, command: &CommandFrame) -> Result<Option<Packet>> {
        let stale = self.link.receive_all(std::time::Duration::ZERO);
        if !stale.is_empty() {
            debug!("Discarded {} stale response(s)", stale.len());
        }

        let payload = command.build();
        trace!("Sending {} ({} bytes)", command.kind().name(), payload.len());
        let packet = Packet::new(
            self.config.source_address,
            self.config.destination_address,
            self.config.source_port,
            self.config.destination_port,
            payload,
        );
        self.link.transmit(&packet)?;

        Ok(self.link.receive(self.config.response_timeout))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::update::command::CommandKind;
    use crate::update::{RetryPolicy, UPDATE_PORT};
    use std::time::Duration;

    type Responder = Box<dyn FnMut(&[u8]) -> Option<Vec<u8>> + Send>;

    /// Answers each request through a closure; `None` means silence.
    struct ScriptedLink {
        responder: Responder,
        sent: Vec<Vec<u8>>,
        inbox: Option<Packet>,
    }

    impl ScriptedLink {
        fn new(responder: impl FnMut(&[u8]) -> Option<Vec<u8>> + Send + 'static) -> Self {
            let _ = env_logger::builder().is_test(true).try_init();
            Self {
                responder: Box::new(responder),
                sent: Vec::new(),
                inbox: None,
            }
        }

        fn acking() -> Self {
            Self::new(|req| Some(vec![req[0]]))
        }

        fn kinds(&self) -> Vec<CommandKind> {
            self.sent
                .iter()
                .map(|p| CommandKind::try_from(p[0]).unwrap())
                .collect()
        }

        fn block_ordinals(&self) -> Vec<u16> {
            self.sent
                .iter()
                .filter(|p| p[0] == CommandKind::Block as u8)
                .map(|p| u16::from_le_bytes([p[1], p[2]]))
                .collect()
        }
    }

    impl Transport for ScriptedLink {
        fn receive(&mut self, _timeout: Duration) -> Option<Packet> {
            self.inbox.take()
        }

        fn receive_all(&mut self, _timeout: Duration) -> Vec<Packet> {
            self.inbox.take().into_iter().collect()
        }

        fn transmit(&mut self, packet: &Packet) -> Result<()> {
            assert_eq!(packet.destination_port(), UPDATE_PORT);
            self.sent.push(packet.payload().to_vec());
            self.inbox = (self.responder)(packet.payload())
                .map(|reply| Packet::new(2, 1, UPDATE_PORT, UPDATE_PORT, reply));
            Ok(())
        }

        fn close(&mut self) -> Result<()> {
            Ok(())
        }

        fn is_open(&self) -> bool {
            true
        }

        fn port_path(&self) -> &str {
            "scripted"
        }
    }

    fn image_100() -> FirmwareImage {
        FirmwareImage::from_bytes((0..100u8).collect()).unwrap()
    }

    fn config_32() -> UpdateConfig {
        UpdateConfig::default()
            .with_block_size(32)
            .with_settle_delay(Duration::ZERO)
            .with_retry(RetryPolicy::default().with_backoff(Duration::ZERO, Duration::ZERO))
    }

    fn never_interrupted() -> bool {
        false
    }

    fn run(link: &mut ScriptedLink, config: UpdateConfig) -> Result<UpdateReport> {
        let image = image_100();
        UpdateSession::new(link, &image, config)?
            .with_interrupt_check(never_interrupted)
            .run(|_| {})
    }

    #[test]
    fn test_nominal_session() {
        let mut link = ScriptedLink::acking();
        let report = run(&mut link, config_32()).unwrap();

        assert_eq!(
            link.kinds(),
            vec![
                CommandKind::Init,
                CommandKind::Block,
                CommandKind::Block,
                CommandKind::Block,
                CommandKind::Block,
            ]
        );
        assert_eq!(link.block_ordinals(), vec![0, 1, 2, 3]);
        assert_eq!(report.init_attempts, 1);
        assert_eq!(report.blocks_sent, 4);
        assert_eq!(report.retransmissions, 0);
    }

    #[test]
    fn test_init_payload_describes_image() {
        let mut link = ScriptedLink::acking();
        run(&mut link, config_32()).unwrap();

        let expected = CommandFrame::init(100, 32, image_100().digest()).build();
        assert_eq!(link.sent[0], expected);
    }

    #[test]
    fn test_block_payloads_carry_image_bytes() {
        let mut link = ScriptedLink::acking();
        run(&mut link, config_32()).unwrap();

        let image = image_100();
        assert_eq!(&link.sent[1][3..], &image.data()[0..32]);
        assert_eq!(&link.sent[4][3..], &image.data()[96..100]);
    }

    #[test]
    fn test_failed_block_is_retransmitted() {
        let mut reported = false;
        let mut link = ScriptedLink::new(move |req| {
            if req[0] == CommandKind::Block as u8 && req[1] == 1 && !reported {
                reported = true;
                return Some(vec![req[0], 1]);
            }
            Some(vec![req[0]])
        });
        let report = run(&mut link, config_32()).unwrap();

        assert_eq!(link.block_ordinals(), vec![0, 1, 2, 3, 1]);
        assert_eq!(report.blocks_sent, 5);
        assert_eq!(report.retransmissions, 1);
    }

    #[test]
    fn test_unanswered_init_cancels_and_retries() {
        let mut first_init = true;
        let mut link = ScriptedLink::new(move |req| {
            if req[0] == CommandKind::Init as u8 && first_init {
                first_init = false;
                return None;
            }
            Some(vec![req[0]])
        });
        let report = run(&mut link, config_32()).unwrap();

        assert_eq!(
            link.kinds()[..3],
            [CommandKind::Init, CommandKind::Cancel, CommandKind::Init]
        );
        assert_eq!(link.block_ordinals(), vec![0, 1, 2, 3]);
        assert_eq!(report.init_attempts, 2);
    }

    #[test]
    fn test_unanswered_cancel_is_fatal() {
        let mut link = ScriptedLink::new(|_| None);
        let err = run(&mut link, config_32()).unwrap_err();

        assert!(matches!(err, Error::Timeout(_)));
        assert_eq!(link.kinds(), vec![CommandKind::Init, CommandKind::Cancel]);
    }

    #[test]
    fn test_unanswered_second_init_is_fatal() {
        let mut link = ScriptedLink::new(|req| {
            (req[0] == CommandKind::Cancel as u8).then(|| vec![req[0]])
        });
        let err = run(&mut link, config_32()).unwrap_err();

        assert!(matches!(err, Error::Timeout(_)));
        assert_eq!(
            link.kinds(),
            vec![CommandKind::Init, CommandKind::Cancel, CommandKind::Init]
        );
    }

    #[test]
    fn test_block_timeout_aborts() {
        let mut link = ScriptedLink::new(|req| {
            if req[0] == CommandKind::Block as u8 && req[1] == 1 {
                return None;
            }
            Some(vec![req[0]])
        });
        let err = run(&mut link, config_32()).unwrap_err();

        assert!(matches!(err, Error::Timeout(_)));
        assert_eq!(link.block_ordinals(), vec![0, 1]);
    }

    #[test]
    fn test_retries_exhausted() {
        let mut link = ScriptedLink::new(|req| {
            if req[0] == CommandKind::Block as u8 && req[1] == 0 {
                return Some(vec![req[0], 0]);
            }
            Some(vec![req[0]])
        });
        let config = config_32().with_retry(
            RetryPolicy::default()
                .with_max_attempts(3)
                .with_backoff(Duration::ZERO, Duration::ZERO),
        );
        let err = run(&mut link, config).unwrap_err();

        assert!(matches!(
            err,
            Error::RetriesExhausted {
                offset: 0,
                attempts: 3
            }
        ));
        assert_eq!(link.block_ordinals(), vec![0, 1, 2, 3, 0, 0]);
    }

    #[test]
    fn test_unbounded_policy_keeps_retrying() {
        let mut failures = 0;
        let mut link = ScriptedLink::new(move |req| {
            if req[0] == CommandKind::Block as u8 && req[1] == 2 && failures < 25 {
                failures += 1;
                return Some(vec![req[0], 2]);
            }
            Some(vec![req[0]])
        });
        let report = run(&mut link, config_32().with_retry(RetryPolicy::unbounded())).unwrap();

        assert_eq!(report.retransmissions, 25);
        assert_eq!(report.blocks_sent, 29);
    }

    #[test]
    fn test_unknown_failed_ordinal_ignored() {
        let mut link = ScriptedLink::new(|req| Some(vec![req[0], 200]));
        let report = run(&mut link, config_32()).unwrap();
        assert_eq!(report.blocks_sent, 4);
    }

    #[test]
    fn test_progress_reports_every_attempt() {
        let mut reported = false;
        let mut link = ScriptedLink::new(move |req| {
            if req[0] == CommandKind::Block as u8 && req[1] == 0 && !reported {
                reported = true;
                return Some(vec![req[0], 0]);
            }
            Some(vec![req[0]])
        });
        let image = image_100();
        let mut seen = Vec::new();
        UpdateSession::new(&mut link, &image, config_32())
            .unwrap()
            .with_interrupt_check(never_interrupted)
            .run(|p| seen.push(*p))
            .unwrap();

        assert_eq!(seen.len(), 5);
        assert_eq!(
            seen[0],
            BlockProgress {
                offset: 0,
                ordinal: 0,
                attempt: 1,
                pending: 3,
                total: 4
            }
        );
        assert_eq!(seen[4].offset, 0);
        assert_eq!(seen[4].attempt, 2);
        assert_eq!(seen[4].pending, 0);
    }

    #[test]
    fn test_interrupted_session() {
        let mut link = ScriptedLink::acking();
        let image = image_100();
        let err = UpdateSession::new(&mut link, &image, config_32())
            .unwrap()
            .with_interrupt_check(|| true)
            .run(|_| {})
            .unwrap_err();

        assert!(matches!(err, Error::Interrupted));
        assert!(link.block_ordinals().is_empty());
    }

    #[test]
    fn test_invalid_block_size_rejected() {
        let mut link = ScriptedLink::acking();
        let image = image_100();
        for size in [0, MAX_BLOCK_SIZE + 1] {
            let config = config_32().with_block_size(size);
            assert!(matches!(
                UpdateSession::new(&mut link, &image, config),
                Err(Error::Config(_))
            ));
        }
    }

    #[test]
    fn test_too_many_blocks_rejected() {
        let mut link = ScriptedLink::acking();
        let image = FirmwareImage::from_bytes(vec![0; MAX_BLOCKS + 1]).unwrap();
        let config = config_32().with_block_size(1);
        assert!(matches!(
            UpdateSession::new(&mut link, &image, config),
            Err(Error::InvalidImage(_))
        ));
    }

    #[test]
    fn test_session_over_dyn_transport() {
        let mut link: Box<dyn Transport> = Box::new(ScriptedLink::acking());
        let image = image_100();
        let report = UpdateSession::new(&mut *link, &image, config_32())
            .unwrap()
            .with_interrupt_check(never_interrupted)
            .run(|_| {})
            .unwrap();
        assert_eq!(report.blocks_sent, 4);
    }
}
