// Licensed under the Apache License, Version 2.0 (the "License");
// you may not use this file except in compliance with the License.
// You may obtain a copy of the License at
//
//     http://www.apache.org/licenses/LICENSE-2.0
//
// Unless required by applicable law or agreed to in writing, software
// distributed under the License is distributed on an "AS IS" BASIS,
// WITHOUT WARRANTIES OR CONDITIONS OF ANY KIND, either express or implied.
// See the License for the specific language governing permissions and
// limitations under the License.

//! The two-semaphore producer/consumer handshake run over one mapped
//! [`Segment`]: a header frame, zero or more data frames, and a final
//! empty frame marking EOF.
//!
//! `sem_w` counts header/frame writes waiting to be consumed; `sem_r`
//! counts free slots the producer may write into. Both start each
//! request at `(sem_w = 0, sem_r = 1)`, so the handshake always begins
//! with the producer publishing the header into the one free slot.
//! Strict alternation — publish, wait for grant, publish, wait for
//! grant — keeps exactly one party touching the payload region at a
//! time.

use shmcache_protocol::Status;

use crate::error::SegmentError;
use crate::segment::Segment;

/// What the consumer reads out of a header frame.
#[derive(Debug, Clone, Copy)]
pub struct Header {
    pub status: Status,
    pub file_size: u64,
}

/// What the consumer reads out of a data frame.
#[derive(Debug)]
pub enum Frame<'a> {
    Data(&'a [u8]),
    Eof,
}

impl Segment {
    /// Producer (cache daemon) role: publish the header frame. Consumes
    /// the one free slot established at segment creation, so this must
    /// be the first thing a cache worker does after attaching.
    pub fn publish_header(&mut self, status: Status, file_size: u64) -> Result<(), SegmentError> {
        let name = self.name.clone();
        let header = self.header_mut();
        header.status = status.to_code();
        header.file_size = file_size;
        unsafe { crate::sem::post(&mut header.sem_w) }
            .map_err(|source| SegmentError::Sem { name, op: "posting sem_w (header)", source })
    }

    /// Producer role: wait for the consumer's grant, write up to
    /// `segsize` bytes of payload, and publish the frame. An empty
    /// `data` slice publishes EOF.
    pub fn publish_frame(&mut self, data: &[u8]) -> Result<(), SegmentError> {
        debug_assert!(data.len() <= self.segsize, "frame larger than segment payload capacity");
        let name = self.name.clone();
        unsafe { crate::sem::wait(&mut self.header_mut().sem_r) }
            .map_err(|source| SegmentError::Sem { name: name.clone(), op: "waiting on sem_r", source })?;

        self.payload_mut()[..data.len()].copy_from_slice(data);
        let header = self.header_mut();
        header.bytes_written = data.len() as u32;
        unsafe { crate::sem::post(&mut header.sem_w) }
            .map_err(|source| SegmentError::Sem { name, op: "posting sem_w (frame)", source })
    }

    /// Consumer (proxy) role: wait for and read the header frame.
    pub fn consume_header(&mut self) -> Result<Header, SegmentError> {
        let name = self.name.clone();
        unsafe { crate::sem::wait(&mut self.header_mut().sem_w) }
            .map_err(|source| SegmentError::Sem { name, op: "waiting on sem_w (header)", source })?;
        let header = self.header();
        Ok(Header { status: Status::from_code(header.status), file_size: header.file_size })
    }

    /// Consumer role: grant the producer one more write (post `sem_r`).
    pub fn grant(&mut self) -> Result<(), SegmentError> {
        let name = self.name.clone();
        unsafe { crate::sem::post(&mut self.header_mut().sem_r) }
            .map_err(|source| SegmentError::Sem { name, op: "posting sem_r", source })
    }

    /// Consumer role: wait for and read the next frame.
    pub fn consume_frame(&mut self) -> Result<Frame<'_>, SegmentError> {
        let name = self.name.clone();
        unsafe { crate::sem::wait(&mut self.header_mut().sem_w) }
            .map_err(|source| SegmentError::Sem { name, op: "waiting on sem_w (frame)", source })?;
        let n = self.header().bytes_written as usize;
        if n == 0 {
            Ok(Frame::Eof)
        } else {
            Ok(Frame::Data(&self.payload()[..n]))
        }
    }

    /// Consumer role: grant and consume frames until EOF, discarding
    /// the payload. Used when the proxy abandons a transfer early (e.g.
    /// the client disconnected) but must still let the producer finish
    /// so the segment can be reset and returned to the pool.
    pub fn drain(&mut self) -> Result<(), SegmentError> {
        loop {
            self.grant()?;
            match self.consume_frame()? {
                Frame::Eof => return Ok(()),
                Frame::Data(_) => continue,
            }
        }
    }
}

#[cfg(test)]
mod test {
    use super::*;

    fn unique_name(tag: &str) -> String {
        format!("/shmcache_test_rendezvous_{}_{}", tag, std::process::id())
    }

    #[test]
    fn single_frame_round_trip() {
        let name = unique_name("single_frame");
        let mut producer = Segment::create(&name, 32).expect("create");
        let mut consumer = Segment::attach(&name, 32).expect("attach");

        producer.publish_header(Status::Ok, 5).expect("publish header");
        let header = consumer.consume_header().expect("consume header");
        assert!(header.status.is_ok());
        assert_eq!(header.file_size, 5);

        consumer.grant().expect("grant");
        producer.publish_frame(b"hello").expect("publish frame");
        match consumer.consume_frame().expect("consume frame") {
            Frame::Data(data) => assert_eq!(data, b"hello"),
            Frame::Eof => panic!("expected data frame"),
        }

        consumer.grant().expect("grant eof");
        producer.publish_frame(&[]).expect("publish eof");
        match consumer.consume_frame().expect("consume eof") {
            Frame::Eof => {}
            Frame::Data(_) => panic!("expected eof"),
        }

        producer.unlink().expect("unlink");
    }

    #[test]
    fn not_found_carries_no_frames() {
        let name = unique_name("not_found");
        let mut producer = Segment::create(&name, 32).expect("create");
        let mut consumer = Segment::attach(&name, 32).expect("attach");

        producer.publish_header(Status::NotFound, 0).expect("publish header");
        let header = consumer.consume_header().expect("consume header");
        assert_eq!(header.status, Status::NotFound);

        producer.unlink().expect("unlink");
    }

    #[test]
    fn drain_discards_remaining_frames() {
        let name = unique_name("drain");
        let mut producer = Segment::create(&name, 4).expect("create");
        let mut consumer = Segment::attach(&name, 4).expect("attach");

        producer.publish_header(Status::Ok, 8).expect("publish header");
        consumer.consume_header().expect("consume header");

        let producer_thread = std::thread::spawn(move || {
            producer.publish_frame(b"abcd").expect("frame 1");
            producer.publish_frame(b"efgh").expect("frame 2");
            producer.publish_frame(&[]).expect("eof");
            producer
        });

        consumer.drain().expect("drain");
        let mut producer = producer_thread.join().expect("producer thread");
        producer.unlink().expect("unlink");
    }
}
